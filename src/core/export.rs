use crate::core::cmdstan::dims::{CHAIN_DIM, DRAW_DIM};
use crate::domain::model::{DataArray, Dataset, InferenceData};
use crate::utils::error::{ConvertError, Result};
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};

pub const JSON_FILE: &str = "inference_data.json";

/// Row-major multi-indices of an array with the given shape.
fn indices(shape: &[usize]) -> Vec<Vec<usize>> {
    let total: usize = shape.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut index = vec![0usize; shape.len()];
    for _ in 0..total {
        out.push(index.clone());
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

/// CmdStan style flat name: `theta.2.1` for zero-based `[1, 0]`.
fn flat_name(var: &str, index: &[usize]) -> String {
    let mut name = var.to_string();
    for i in index {
        name.push('.');
        name.push_str(&(i + 1).to_string());
    }
    name
}

fn is_sampled(array: &DataArray) -> bool {
    array.dims.len() >= 2 && array.dims[0] == CHAIN_DIM && array.dims[1] == DRAW_DIM
}

/// Wide table: `chain,draw` then one column per array element.
fn sampled_to_csv(group: &str, dataset: &Dataset) -> Result<Vec<u8>> {
    let mut chains = 0;
    let mut draws = 0;
    for (name, array) in &dataset.data_vars {
        if (chains, draws) == (0, 0) {
            chains = array.shape[0];
            draws = array.shape[1];
        } else if array.shape[0] != chains || array.shape[1] != draws {
            return Err(ConvertError::shape(
                name,
                format!("chain/draw sizes differ from the rest of group '{}'", group),
            ));
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec![CHAIN_DIM.to_string(), DRAW_DIM.to_string()];
    let mut layout = Vec::new();
    for (name, array) in &dataset.data_vars {
        let cells = indices(&array.shape[2..]);
        for (cell, index) in cells.iter().enumerate() {
            header.push(flat_name(name, index));
            layout.push((array, cell, cells.len()));
        }
    }
    writer.write_record(&header)?;

    for chain in 0..chains {
        for draw in 0..draws {
            let mut record = vec![chain.to_string(), draw.to_string()];
            for (array, cell, cell_count) in &layout {
                let offset = (chain * draws + draw) * cell_count + cell;
                record.push(array.values.format_at(offset));
            }
            writer.write_record(&record)?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| ConvertError::IoError(e.into_error()))
}

/// Long table `variable,index,value` for data without chain/draw axes.
fn long_to_csv(dataset: &Dataset) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["variable", "index", "value"])?;
    for (name, array) in &dataset.data_vars {
        for (offset, index) in indices(&array.shape).iter().enumerate() {
            let label = index
                .iter()
                .map(|i| (i + 1).to_string())
                .collect::<Vec<_>>()
                .join(".");
            writer.write_record([
                name.as_str(),
                label.as_str(),
                array.values.format_at(offset).as_str(),
            ])?;
        }
    }
    writer
        .into_inner()
        .map_err(|e| ConvertError::IoError(e.into_error()))
}

pub fn dataset_to_csv(group: &str, dataset: &Dataset) -> Result<Vec<u8>> {
    if !dataset.is_empty() && dataset.data_vars.values().all(is_sampled) {
        sampled_to_csv(group, dataset)
    } else {
        long_to_csv(dataset)
    }
}

/// Serializes the requested formats into `(file name, bytes)` pairs.
pub fn render(data: &InferenceData, formats: &[String]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();
    for format in formats {
        match format.as_str() {
            "json" => files.push((JSON_FILE.to_string(), serde_json::to_vec_pretty(data)?)),
            "csv" => {
                for (group, dataset) in data.groups() {
                    files.push((format!("{}.csv", group), dataset_to_csv(group, dataset)?));
                }
            }
            other => {
                return Err(ConvertError::InvalidConfigValueError {
                    field: "output_formats".to_string(),
                    value: other.to_string(),
                    reason: "Unsupported format".to_string(),
                })
            }
        }
    }
    Ok(files)
}

pub fn zip_files(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, bytes) in files {
        zip.start_file::<_, ()>(name.as_str(), FileOptions::default())?;
        zip.write_all(bytes)?;
    }
    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cmdstan::dict_to_dataset;
    use crate::domain::model::ArrayValues;
    use std::collections::HashMap;

    fn posterior() -> Dataset {
        let vars = vec![
            ("mu".to_string(), vec![1, 2], ArrayValues::Float(vec![0.5, 0.25])),
            (
                "z".to_string(),
                vec![1, 2, 2],
                ArrayValues::Float(vec![1.0, 2.0, 3.0, 4.0]),
            ),
        ];
        dict_to_dataset(vars, &HashMap::new(), &HashMap::new(), true).unwrap()
    }

    #[test]
    fn test_indices_row_major() {
        assert_eq!(indices(&[2, 2]), vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
        assert_eq!(indices(&[]), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn test_sampled_csv_layout() {
        let bytes = dataset_to_csv("posterior", &posterior()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "chain,draw,mu,z.1,z.2");
        assert_eq!(lines[1], "0,0,0.5,1,2");
        assert_eq!(lines[2], "0,1,0.25,3,4");
    }

    #[test]
    fn test_observed_csv_is_long() {
        let vars = vec![("y".to_string(), vec![2], ArrayValues::Float(vec![28.0, 8.0]))];
        let ds = dict_to_dataset(vars, &HashMap::new(), &HashMap::new(), false).unwrap();
        let text = String::from_utf8(dataset_to_csv("observed_data", &ds).unwrap()).unwrap();
        assert_eq!(text, "variable,index,value\ny,1,28\ny,2,8\n");
    }

    #[test]
    fn test_render_and_zip() {
        let data = InferenceData {
            posterior: Some(posterior()),
            ..Default::default()
        };
        let files = render(&data, &["json".to_string(), "csv".to_string()]).unwrap();
        let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec![JSON_FILE, "posterior.csv"]);

        let archive_bytes = zip_files(&files).unwrap();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(archive_bytes)).unwrap();
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn test_json_keeps_non_finite_draws() {
        use crate::core::cmdstan::read_output;
        use crate::core::converter::{CmdStanConverter, ConversionSettings};
        use crate::core::ParsedRun;

        // x.2 has no column, so its cells are NaN
        let text = "lp__,mu,x.1,x.3\n-1,inf,1,3\n-2,-inf,4,6\n";
        let run = ParsedRun {
            output: read_output("chain_1.csv", text).unwrap(),
            ..Default::default()
        };
        let data = CmdStanConverter::new(run, ConversionSettings::default())
            .unwrap()
            .to_inference_data()
            .unwrap();

        let files = render(&data, &["json".to_string()]).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&files[0].1).unwrap();
        assert_eq!(
            json["posterior"]["data_vars"]["mu"]["values"]["data"],
            serde_json::json!(["Infinity", "-Infinity"])
        );

        let back: InferenceData = serde_json::from_slice(&files[0].1).unwrap();
        let posterior = back.posterior.unwrap();
        assert_eq!(posterior.var("mu").unwrap().get(&[0, 0]), Some(f64::INFINITY));
        assert_eq!(posterior.var("mu").unwrap().get(&[0, 1]), Some(f64::NEG_INFINITY));
        let x = posterior.var("x").unwrap();
        assert_eq!(x.shape, vec![1, 2, 3]);
        assert!(x.get(&[0, 1, 1]).unwrap().is_nan());
        assert_eq!(x.get(&[0, 1, 2]), Some(6.0));
    }

    #[test]
    fn test_render_rejects_unknown_format() {
        let data = InferenceData::default();
        assert!(render(&data, &["netcdf".to_string()]).is_err());
    }
}
