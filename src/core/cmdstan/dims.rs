use crate::domain::model::{ArrayValues, Coord, DataArray, Dataset};
use crate::utils::error::{ConvertError, Result};
use std::collections::{BTreeMap, HashMap};

pub const CHAIN_DIM: &str = "chain";
pub const DRAW_DIM: &str = "draw";

fn positional(len: usize) -> Vec<Coord> {
    (0..len).map(|i| serde_json::json!(i)).collect()
}

/// Names every axis of `shape` and picks coordinate labels for it.
///
/// With `sample_dims` the first two axes are `chain` and `draw`. The other
/// axes take their names from `dims[var_name]`, falling back to
/// `{var_name}_dim_{k}`, and their labels from `coords`, falling back to
/// positions.
pub fn generate_dims_coords(
    shape: &[usize],
    var_name: &str,
    dims: &HashMap<String, Vec<String>>,
    coords: &HashMap<String, Vec<Coord>>,
    sample_dims: bool,
) -> Result<(Vec<String>, BTreeMap<String, Vec<Coord>>)> {
    let mut names = Vec::with_capacity(shape.len());
    let mut labels = BTreeMap::new();

    let skip = if sample_dims { 2 } else { 0 };
    if shape.len() < skip {
        return Err(ConvertError::shape(
            var_name,
            format!("expected chain and draw axes, got shape {:?}", shape),
        ));
    }
    if sample_dims {
        names.push(CHAIN_DIM.to_string());
        names.push(DRAW_DIM.to_string());
        labels.insert(CHAIN_DIM.to_string(), positional(shape[0]));
        labels.insert(DRAW_DIM.to_string(), positional(shape[1]));
    }

    let var_axes = &shape[skip..];
    let user_dims = dims.get(var_name).map(Vec::as_slice).unwrap_or(&[]);
    if user_dims.len() > var_axes.len() {
        return Err(ConvertError::shape(
            var_name,
            format!(
                "{} dims given ({}) but the variable has {} axes",
                user_dims.len(),
                user_dims.join(", "),
                var_axes.len()
            ),
        ));
    }

    for (k, len) in var_axes.iter().enumerate() {
        let name = user_dims
            .get(k)
            .cloned()
            .unwrap_or_else(|| format!("{}_dim_{}", var_name, k));
        let axis_labels = match coords.get(&name) {
            Some(given) if given.len() == *len => given.clone(),
            Some(given) => {
                return Err(ConvertError::shape(
                    var_name,
                    format!(
                        "coords for dim '{}' have {} labels but the axis has length {}",
                        name,
                        given.len(),
                        len
                    ),
                ))
            }
            None => positional(*len),
        };
        labels.insert(name.clone(), axis_labels);
        names.push(name);
    }

    Ok((names, labels))
}

/// Builds a dataset from `(name, shape, values)` triples, naming axes with
/// [`generate_dims_coords`] and stamping provenance attributes.
pub fn dict_to_dataset(
    vars: Vec<(String, Vec<usize>, ArrayValues)>,
    coords: &HashMap<String, Vec<Coord>>,
    dims: &HashMap<String, Vec<String>>,
    sample_dims: bool,
) -> Result<Dataset> {
    let mut dataset = Dataset::default();
    for (name, shape, values) in vars {
        let (var_dims, var_coords) = generate_dims_coords(&shape, &name, dims, coords, sample_dims)?;
        let array = DataArray::new(&name, var_dims, shape, values)?;
        dataset.add_var(&name, array, var_coords)?;
    }
    dataset
        .attrs
        .insert("created_at".to_string(), chrono::Utc::now().to_rfc3339());
    dataset
        .attrs
        .insert("inference_library".to_string(), "cmdstan".to_string());
    Ok(dataset)
}
