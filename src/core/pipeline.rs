use crate::core::cmdstan::{read_output, read_rdump};
use crate::core::converter::{CmdStanConverter, ConversionSettings};
use crate::core::export::{render, zip_files};
use crate::core::{ConfigProvider, InferenceData, ParsedRun, Pipeline, PredictiveSource, Storage};
use crate::domain::model::ChainDraws;
use crate::utils::error::{ConvertError, Result};
use std::path::Path;

pub struct CmdStanPipeline<S: Storage, C: ConfigProvider> {
    storage: S,
    config: C,
}

impl<S: Storage, C: ConfigProvider> CmdStanPipeline<S, C> {
    pub fn new(storage: S, config: C) -> Self {
        Self { storage, config }
    }

    async fn read_text(&self, path: &str) -> Result<String> {
        let bytes = self.storage.read_file(path).await?;
        String::from_utf8(bytes)
            .map_err(|e| ConvertError::parse(path, 0, format!("file is not valid UTF-8: {}", e)))
    }

    async fn read_chains(&self, label: &str, paths: &[String]) -> Result<Vec<ChainDraws>> {
        let mut chains = Vec::new();
        for path in paths {
            tracing::debug!("Reading {} file {}", label, path);
            let text = self.read_text(path).await?;
            chains.extend(read_output(path, &text)?);
        }
        if !paths.is_empty() {
            tracing::info!("Read {} {} chain(s) from {} file(s)", chains.len(), label, paths.len());
        }
        Ok(chains)
    }

    fn settings(&self) -> ConversionSettings {
        ConversionSettings {
            posterior_predictive: self.config.posterior_predictive().cloned(),
            observed_data_var: self.config.observed_data_var().map(<[String]>::to_vec),
            log_likelihood: self.config.log_likelihood().map(str::to_string),
            coords: self.config.coords().clone(),
            dims: self.config.dims().clone(),
            save_warmup: self.config.save_warmup(),
        }
    }

    fn output_file(&self, name: &str) -> String {
        Path::new(self.config.output_path())
            .join(name)
            .to_string_lossy()
            .to_string()
    }
}

#[async_trait::async_trait]
impl<S: Storage, C: ConfigProvider> Pipeline for CmdStanPipeline<S, C> {
    async fn extract(&self) -> Result<ParsedRun> {
        let output = self.read_chains("output", self.config.output_files()).await?;
        let prior = self.read_chains("prior", self.config.prior_files()).await?;
        let posterior_predictive = match self.config.posterior_predictive() {
            Some(PredictiveSource::Files(paths)) => {
                self.read_chains("posterior predictive", paths).await?
            }
            _ => Vec::new(),
        };
        let observed_data = match self.config.observed_data() {
            Some(path) => {
                tracing::debug!("Reading observed data {}", path);
                Some(read_rdump(&self.read_text(path).await?)?)
            }
            None => None,
        };

        Ok(ParsedRun {
            output,
            prior,
            posterior_predictive,
            observed_data,
        })
    }

    async fn transform(&self, run: ParsedRun) -> Result<InferenceData> {
        let converter = CmdStanConverter::new(run, self.settings())?;
        let data = converter.to_inference_data()?;
        for (group, dataset) in data.groups() {
            tracing::debug!("Group {} with {} variable(s)", group, dataset.data_vars.len());
        }
        Ok(data)
    }

    async fn load(&self, data: InferenceData) -> Result<String> {
        let files = render(&data, self.config.output_formats())?;

        if let Some(archive) = self.config.archive_name() {
            tracing::debug!("Creating ZIP file with {} files", files.len());
            let zip_data = zip_files(&files)?;
            let path = self.output_file(archive);
            tracing::debug!("Writing ZIP file ({} bytes) to storage", zip_data.len());
            self.storage.write_file(&path, &zip_data).await?;
            return Ok(path);
        }

        for (name, bytes) in &files {
            let path = self.output_file(name);
            tracing::debug!("Writing {} ({} bytes)", path, bytes.len());
            self.storage.write_file(&path, bytes).await?;
        }
        Ok(self.config.output_path().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Coord;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone)]
    struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        fn new() -> Self {
            Self {
                files: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        async fn put(&self, path: &str, text: &str) {
            self.files
                .lock()
                .await
                .insert(path.to_string(), text.as_bytes().to_vec());
        }

        async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned()
        }
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned().ok_or_else(|| {
                ConvertError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                ))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            let mut files = self.files.lock().await;
            files.insert(path.to_string(), data.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockConfig {
        output: Vec<String>,
        prior: Vec<String>,
        posterior_predictive: Option<PredictiveSource>,
        observed_data: Option<String>,
        coords: HashMap<String, Vec<Coord>>,
        dims: HashMap<String, Vec<String>>,
        formats: Vec<String>,
        archive: Option<String>,
    }

    impl ConfigProvider for MockConfig {
        fn output_files(&self) -> &[String] {
            &self.output
        }
        fn prior_files(&self) -> &[String] {
            &self.prior
        }
        fn posterior_predictive(&self) -> Option<&PredictiveSource> {
            self.posterior_predictive.as_ref()
        }
        fn observed_data(&self) -> Option<&str> {
            self.observed_data.as_deref()
        }
        fn observed_data_var(&self) -> Option<&[String]> {
            None
        }
        fn log_likelihood(&self) -> Option<&str> {
            None
        }
        fn coords(&self) -> &HashMap<String, Vec<Coord>> {
            &self.coords
        }
        fn dims(&self) -> &HashMap<String, Vec<String>> {
            &self.dims
        }
        fn save_warmup(&self) -> bool {
            false
        }
        fn output_path(&self) -> &str {
            "test_output"
        }
        fn output_formats(&self) -> &[String] {
            &self.formats
        }
        fn archive_name(&self) -> Option<&str> {
            self.archive.as_deref()
        }
    }

    const CHAIN: &str = "# num_samples = 2\nlp__,mu,y_rep.1,y_rep.2\n-1,0.5,1,2\n-2,0.6,3,4\n";
    const PP_CHAIN: &str = "lp__,y_rep.1,y_rep.2\n0,5,6\n0,7,8\n";

    async fn storage_with_inputs() -> MockStorage {
        let storage = MockStorage::new();
        storage.put("runs/output_1.csv", CHAIN).await;
        storage.put("runs/output_2.csv", CHAIN).await;
        storage.put("runs/pp.csv", PP_CHAIN).await;
        storage.put("runs/data.R", "N <- 2\ny <- c(1.5, 2.5)\n").await;
        storage
    }

    fn config() -> MockConfig {
        MockConfig {
            output: vec!["runs/output_1.csv".into(), "runs/output_2.csv".into()],
            formats: vec!["json".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_extract_reads_all_inputs() {
        let storage = storage_with_inputs().await;
        let pipeline = CmdStanPipeline::new(
            storage,
            MockConfig {
                prior: vec!["runs/output_1.csv".into()],
                posterior_predictive: Some(PredictiveSource::Files(vec!["runs/pp.csv".into()])),
                observed_data: Some("runs/data.R".into()),
                ..config()
            },
        );

        let run = pipeline.extract().await.unwrap();
        assert_eq!(run.output.len(), 2);
        assert_eq!(run.prior.len(), 1);
        assert_eq!(run.posterior_predictive.len(), 1);
        assert_eq!(run.observed_data.unwrap()["y"].values, vec![1.5, 2.5]);
    }

    #[tokio::test]
    async fn test_extract_missing_file() {
        let storage = MockStorage::new();
        let pipeline = CmdStanPipeline::new(storage, config());
        let err = pipeline.extract().await.unwrap_err();
        assert!(matches!(err, ConvertError::IoError(_)));
    }

    #[tokio::test]
    async fn test_transform_with_predictive_variables() {
        let storage = storage_with_inputs().await;
        let pipeline = CmdStanPipeline::new(
            storage,
            MockConfig {
                posterior_predictive: Some(PredictiveSource::Variables(vec!["y_rep".into()])),
                ..config()
            },
        );

        let run = pipeline.extract().await.unwrap();
        let data = pipeline.transform(run).await.unwrap();

        let posterior = data.posterior.unwrap();
        assert!(posterior.var("y_rep").is_none());
        assert_eq!(posterior.var("mu").unwrap().shape, vec![2, 2]);
        let pp = data.posterior_predictive.unwrap();
        assert_eq!(pp.var("y_rep").unwrap().get(&[1, 1, 0]), Some(3.0));
    }

    #[tokio::test]
    async fn test_load_writes_separate_files() {
        let storage = storage_with_inputs().await;
        let pipeline = CmdStanPipeline::new(
            storage.clone(),
            MockConfig {
                formats: vec!["json".into(), "csv".into()],
                ..config()
            },
        );

        let run = pipeline.extract().await.unwrap();
        let data = pipeline.transform(run).await.unwrap();
        let path = pipeline.load(data).await.unwrap();

        assert_eq!(path, "test_output");
        let json = storage.get_file("test_output/inference_data.json").await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert!(parsed.get("posterior").is_some());
        assert!(parsed.get("prior").is_none());
        assert!(storage.get_file("test_output/posterior.csv").await.is_some());
        assert!(storage.get_file("test_output/sample_stats.csv").await.is_some());
    }

    #[tokio::test]
    async fn test_load_into_archive() {
        let storage = storage_with_inputs().await;
        let pipeline = CmdStanPipeline::new(
            storage.clone(),
            MockConfig {
                formats: vec!["json".into(), "csv".into()],
                archive: Some("run.zip".into()),
                ..config()
            },
        );

        let run = pipeline.extract().await.unwrap();
        let data = pipeline.transform(run).await.unwrap();
        let path = pipeline.load(data).await.unwrap();
        assert_eq!(path, "test_output/run.zip");

        let zip_bytes = storage.get_file("test_output/run.zip").await.unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_bytes)).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["inference_data.json", "posterior.csv", "sample_stats.csv"]
        );
        assert!(storage.get_file("test_output/inference_data.json").await.is_none());
    }
}
