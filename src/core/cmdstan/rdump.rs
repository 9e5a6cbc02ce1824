use crate::domain::model::{element_count, RValue};
use crate::utils::error::{ConvertError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn structure_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^structure\s*\(\s*(.+?)\s*,\s*\.Dim\s*=\s*(.+?)\s*\)$")
            .expect("structure pattern is valid")
    })
}

fn vector_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^c\s*\((.*)\)$").expect("vector pattern is valid"))
}

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(-?\d+)L?\s*:\s*(-?\d+)L?$").expect("range pattern is valid")
    })
}

fn rdump_error(variable: &str, message: impl Into<String>) -> ConvertError {
    ConvertError::RdumpError {
        variable: variable.to_string(),
        message: message.into(),
    }
}

fn parse_number(variable: &str, token: &str) -> Result<f64> {
    let token = token.trim();
    let token = token.strip_suffix('L').unwrap_or(token);
    match token {
        "NA" | "NaN" => Ok(f64::NAN),
        "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        _ => token
            .parse::<f64>()
            .map_err(|_| rdump_error(variable, format!("invalid number '{}'", token))),
    }
}

/// Flat values of a scalar, `c(...)` vector or `a:b` range.
fn parse_sequence(variable: &str, expr: &str) -> Result<Vec<f64>> {
    let expr = expr.trim();
    if let Some(caps) = vector_re().captures(expr) {
        let body = caps[1].trim();
        if body.is_empty() {
            return Ok(Vec::new());
        }
        let mut values = Vec::new();
        for part in body.split(',') {
            values.extend(parse_sequence(variable, part)?);
        }
        return Ok(values);
    }
    if let Some(caps) = range_re().captures(expr) {
        let start = parse_number(variable, &caps[1])? as i64;
        let end = parse_number(variable, &caps[2])? as i64;
        let values = if start <= end {
            (start..=end).map(|v| v as f64).collect()
        } else {
            (end..=start).rev().map(|v| v as f64).collect()
        };
        return Ok(values);
    }
    if matches!(expr, "integer(0)" | "double(0)" | "numeric(0)") {
        return Ok(Vec::new());
    }
    Ok(vec![parse_number(variable, expr)?])
}

/// Converts column-major (R) storage into row-major storage.
fn fortran_to_c(values: &[f64], shape: &[usize]) -> Vec<f64> {
    let total = values.len();
    let mut out = vec![0.0; total];
    let mut index = vec![0usize; shape.len()];
    for value in values {
        let mut offset = 0;
        for (i, len) in index.iter().zip(shape) {
            offset = offset * len + i;
        }
        out[offset] = *value;
        // column-major increments the first axis fastest
        for (axis, len) in shape.iter().enumerate() {
            index[axis] += 1;
            if index[axis] < *len {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

fn parse_value(variable: &str, expr: &str) -> Result<RValue> {
    let expr = expr.trim();
    if let Some(caps) = structure_re().captures(expr) {
        let values = parse_sequence(variable, &caps[1])?;
        let shape: Vec<usize> = parse_sequence(variable, &caps[2])?
            .into_iter()
            .map(|d| {
                if d >= 0.0 && d.fract() == 0.0 {
                    Ok(d as usize)
                } else {
                    Err(rdump_error(variable, format!("invalid dimension {}", d)))
                }
            })
            .collect::<Result<_>>()?;
        let expected = element_count(&shape)
            .ok_or_else(|| rdump_error(variable, format!(".Dim {:?} is too large", shape)))?;
        if shape.is_empty() || expected != values.len() {
            return Err(rdump_error(
                variable,
                format!(
                    ".Dim {:?} needs {} values, got {}",
                    shape,
                    expected,
                    values.len()
                ),
            ));
        }
        return Ok(RValue {
            values: fortran_to_c(&values, &shape),
            shape,
        });
    }

    let is_vector = vector_re().is_match(expr) || range_re().is_match(expr);
    let values = parse_sequence(variable, expr)?;
    let shape = if is_vector || values.len() != 1 {
        vec![values.len()]
    } else {
        Vec::new()
    };
    Ok(RValue { shape, values })
}

fn clean_name(name: &str) -> &str {
    let name = name.trim();
    name.trim_matches(|c| c == '"' || c == '`' || c == '\'')
}

/// Reads R dump formatted data (`name <- value` statements).
pub fn read_rdump(text: &str) -> Result<BTreeMap<String, RValue>> {
    let mut statements: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.contains("<-") || statements.is_empty() {
            statements.push(line.to_string());
        } else if let Some(last) = statements.last_mut() {
            last.push(' ');
            last.push_str(line);
        }
    }

    let mut data = BTreeMap::new();
    for statement in statements {
        let (name, expr) = statement
            .split_once("<-")
            .ok_or_else(|| rdump_error("?", format!("expected 'name <- value', got '{}'", statement)))?;
        let name = clean_name(name);
        if name.is_empty() {
            return Err(rdump_error("?", "missing variable name"));
        }
        let value = parse_value(name, expr)?;
        tracing::debug!("R dump variable {} with shape {:?}", name, value.shape);
        data.insert(name.to_string(), value);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_and_vectors() {
        let data = read_rdump("J <- 8\ny <- c(28, 8, -3, 7, -1, 1, 18, 12)\nsigma <- 1.5e1\n").unwrap();
        assert_eq!(data["J"].shape, Vec::<usize>::new());
        assert_eq!(data["J"].values, vec![8.0]);
        assert_eq!(data["y"].shape, vec![8]);
        assert_eq!(data["y"].values[2], -3.0);
        assert_eq!(data["sigma"].values, vec![15.0]);
    }

    #[test]
    fn test_oversized_dim_is_an_error() {
        let err = read_rdump("m <- structure(c(1, 2), .Dim = c(4294967296, 4294967296, 2))\n")
            .unwrap_err();
        assert!(matches!(err, ConvertError::RdumpError { ref variable, .. } if variable == "m"));
        assert!(err.to_string().contains("too large"));

        assert!(read_rdump("m <- structure(c(), .Dim = c(4294967296, 4294967296))\n").is_err());
    }

    #[test]
    fn test_multiline_statement() {
        let text = "x <- c(1, 2,\n 3, 4)\n\"n\" <- 4L\n";
        let data = read_rdump(text).unwrap();
        assert_eq!(data["x"].values, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(data["n"].values, vec![4.0]);
    }

    #[test]
    fn test_structure_is_row_major() {
        // R fills matrix(1:6, 2, 3) column by column
        let text = "m <- structure(c(1, 2, 3, 4, 5, 6), .Dim = c(2, 3))\n";
        let data = read_rdump(text).unwrap();
        assert_eq!(data["m"].shape, vec![2, 3]);
        assert_eq!(data["m"].values, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_three_dim_structure() {
        let text = "a <- structure(1:8, .Dim = c(2L, 2L, 2L))";
        let data = read_rdump(text).unwrap();
        // element [i, j, k] of R holds 1 + i + 2j + 4k
        let value = |i: usize, j: usize, k: usize| data["a"].values[i * 4 + j * 2 + k];
        assert_eq!(value(1, 0, 0), 2.0);
        assert_eq!(value(0, 1, 0), 3.0);
        assert_eq!(value(0, 0, 1), 5.0);
        assert_eq!(value(1, 1, 1), 8.0);
    }

    #[test]
    fn test_ranges_and_specials() {
        let data = read_rdump("idx <- 3:1\nz <- c(NA, Inf, -Inf)\ne <- integer(0)\n").unwrap();
        assert_eq!(data["idx"].values, vec![3.0, 2.0, 1.0]);
        assert_eq!(data["idx"].shape, vec![3]);
        assert!(data["z"].values[0].is_nan());
        assert_eq!(data["z"].values[1], f64::INFINITY);
        assert_eq!(data["e"].shape, vec![0]);
    }

    #[test]
    fn test_single_element_vector_keeps_axis() {
        let data = read_rdump("v <- c(2.5)\n").unwrap();
        assert_eq!(data["v"].shape, vec![1]);
    }

    #[test]
    fn test_errors_name_the_variable() {
        let err = read_rdump("bad <- c(1, two)\n").unwrap_err();
        match err {
            ConvertError::RdumpError { variable, .. } => assert_eq!(variable, "bad"),
            other => panic!("unexpected error {:?}", other),
        }

        let err = read_rdump("m <- structure(c(1, 2, 3), .Dim = c(2, 2))").unwrap_err();
        assert!(err.to_string().contains("needs 4 values"));
    }
}
