use crate::domain::model::{element_count, ColumnBlock};
use crate::utils::error::{ConvertError, Result};
use std::collections::BTreeMap;

/// Draws of one variable with shape `(chain, draw, *var_shape)`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDraws {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

/// Splits a flattened column name into its variable and zero-based index.
/// Accepts both `theta.2.1` and `theta[2,1]`.
pub fn parse_column(column: &str) -> Result<(String, Vec<usize>)> {
    let (base, raw_indices): (&str, Vec<&str>) = match column.split_once('[') {
        Some((base, rest)) => {
            let inner = rest
                .strip_suffix(']')
                .ok_or_else(|| ConvertError::shape(column, "unterminated index"))?;
            (base, inner.split(',').collect())
        }
        None => {
            let mut parts = column.split('.');
            let base = parts.next().unwrap_or(column);
            (base, parts.collect())
        }
    };

    if base.is_empty() {
        return Err(ConvertError::shape(column, "empty variable name"));
    }

    let indices = raw_indices
        .iter()
        .map(|raw| match raw.trim().parse::<usize>() {
            Ok(i) if i >= 1 => Ok(i - 1),
            _ => Err(ConvertError::shape(
                column,
                format!("index '{}' is not a positive integer", raw.trim()),
            )),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((base.to_string(), indices))
}

/// Base variable name of a column (`theta.1.2` -> `theta`).
pub fn base_name(column: &str) -> &str {
    let end = column.find(['.', '[']).unwrap_or(column.len());
    &column[..end]
}

/// Groups flat columns into n-dimensional variables across chains.
/// Cells without a column are NaN.
pub fn unpack_chains(chains: &[ColumnBlock]) -> Result<BTreeMap<String, VarDraws>> {
    let Some(first) = chains.first() else {
        return Ok(BTreeMap::new());
    };

    let n_chains = chains.len();
    let n_draws = first.rows.len();
    for (chain_id, chain) in chains.iter().enumerate() {
        if chain.columns != first.columns {
            return Err(ConvertError::ProcessingError {
                message: format!("inconsistent chains: chain {} has different columns", chain_id),
            });
        }
        if chain.rows.len() != n_draws {
            return Err(ConvertError::ProcessingError {
                message: format!(
                    "inconsistent chains: chain {} has {} draws, chain 0 has {}",
                    chain_id,
                    chain.rows.len(),
                    n_draws
                ),
            });
        }
    }

    let mut groups: BTreeMap<String, Vec<(usize, Vec<usize>)>> = BTreeMap::new();
    for (position, column) in first.columns.iter().enumerate() {
        let (name, index) = parse_column(column)?;
        groups.entry(name).or_default().push((position, index));
    }

    let mut result = BTreeMap::new();
    for (name, locations) in groups {
        let ndim = locations[0].1.len();
        if locations.iter().any(|(_, idx)| idx.len() != ndim) {
            return Err(ConvertError::shape(&name, "columns disagree on the number of indices"));
        }

        let mut var_shape = vec![0usize; ndim];
        for (_, idx) in &locations {
            for (axis, i) in idx.iter().enumerate() {
                var_shape[axis] = var_shape[axis].max(i + 1);
            }
        }
        let mut shape = vec![n_chains, n_draws];
        shape.extend(&var_shape);
        let (Some(cell_count), Some(total)) = (element_count(&var_shape), element_count(&shape)) else {
            return Err(ConvertError::shape(&name, format!("shape {:?} is too large", shape)));
        };

        let mut values = vec![f64::NAN; total];
        for (position, idx) in &locations {
            let mut cell = 0;
            for (i, len) in idx.iter().zip(&var_shape) {
                cell = cell * len + i;
            }
            for (chain_id, chain) in chains.iter().enumerate() {
                for (draw, row) in chain.rows.iter().enumerate() {
                    values[(chain_id * n_draws + draw) * cell_count + cell] = row[*position];
                }
            }
        }

        result.insert(name, VarDraws { shape, values });
    }

    Ok(result)
}
