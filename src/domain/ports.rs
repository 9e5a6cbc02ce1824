use crate::domain::model::{ChainDraws, Coord, InferenceData, RValue};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Where posterior predictive draws come from.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictiveSource {
    /// Variables generated alongside the posterior in the output files.
    Variables(Vec<String>),
    /// Separate CmdStan CSV files.
    Files(Vec<String>),
}

pub trait ConfigProvider: Send + Sync {
    fn output_files(&self) -> &[String];
    fn prior_files(&self) -> &[String];
    fn posterior_predictive(&self) -> Option<&PredictiveSource>;
    fn observed_data(&self) -> Option<&str>;
    fn observed_data_var(&self) -> Option<&[String]>;
    fn log_likelihood(&self) -> Option<&str>;
    fn coords(&self) -> &HashMap<String, Vec<Coord>>;
    fn dims(&self) -> &HashMap<String, Vec<String>>;
    fn save_warmup(&self) -> bool;
    fn output_path(&self) -> &str;
    fn output_formats(&self) -> &[String];
    /// Archive file name when results are bundled into a ZIP.
    fn archive_name(&self) -> Option<&str>;
}

/// Everything read during extraction, before any reshaping.
#[derive(Debug, Clone, Default)]
pub struct ParsedRun {
    pub output: Vec<ChainDraws>,
    pub prior: Vec<ChainDraws>,
    pub posterior_predictive: Vec<ChainDraws>,
    pub observed_data: Option<BTreeMap<String, RValue>>,
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<ParsedRun>;
    async fn transform(&self, run: ParsedRun) -> Result<InferenceData>;
    async fn load(&self, data: InferenceData) -> Result<String>;
}
