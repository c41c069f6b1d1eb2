//! Reading typed cells out of polars columns

use crate::error::{FeatureflowError, Result};
use polars::prelude::*;

/// Cells as strings; nulls become `fill`
pub fn string_cells(column: &Column, fill: &str) -> Result<Vec<String>> {
    let casted = column
        .cast(&DataType::String)
        .map_err(|e| FeatureflowError::PreprocessingError(format!("{}: {e}", column.name())))?;
    let ca = casted.as_materialized_series().str()?.clone();
    Ok(ca
        .into_iter()
        .map(|v| v.unwrap_or(fill).to_string())
        .collect())
}

/// Cells as floats; strings are parsed, nulls become `fill`
pub fn float_cells(column: &Column, fill: f64) -> Result<Vec<f64>> {
    if column.dtype() == &DataType::String {
        let ca = column.as_materialized_series().str()?.clone();
        return ca
            .into_iter()
            .map(|v| match v.map(str::trim) {
                None | Some("") => Ok(fill),
                Some(s) => s.parse::<f64>().map_err(|_| {
                    FeatureflowError::PreprocessingError(format!(
                        "{}: cannot parse '{s}' as a number",
                        column.name()
                    ))
                }),
            })
            .collect();
    }

    let casted = column
        .cast(&DataType::Float64)
        .map_err(|e| FeatureflowError::PreprocessingError(format!("{}: {e}", column.name())))?;
    let ca = casted.as_materialized_series().f64()?.clone();
    Ok(ca.into_iter().map(|v| v.unwrap_or(fill)).collect())
}

/// Parse the usual spellings of a boolean
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "1.0" | "on" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "0.0" | "off" => Some(false),
        _ => None,
    }
}

/// Cells as booleans; nulls become `fill`
pub fn bool_cells(column: &Column, fill: bool) -> Result<Vec<bool>> {
    match column.dtype() {
        DataType::Boolean => {
            let ca = column.as_materialized_series().bool()?.clone();
            Ok(ca.into_iter().map(|v| v.unwrap_or(fill)).collect())
        }
        DataType::String => {
            let ca = column.as_materialized_series().str()?.clone();
            ca.into_iter()
                .map(|v| match v {
                    None => Ok(fill),
                    Some(s) => parse_bool(s).ok_or_else(|| {
                        FeatureflowError::PreprocessingError(format!(
                            "{}: cannot parse '{s}' as a boolean",
                            column.name()
                        ))
                    }),
                })
                .collect()
        }
        _ => Ok(float_cells(column, if fill { 1.0 } else { 0.0 })?
            .into_iter()
            .map(|v| v != 0.0)
            .collect()),
    }
}

/// Cells as whitespace separated float lists; nulls become empty lists
pub fn float_list_cells(column: &Column) -> Result<Vec<Vec<f64>>> {
    string_cells(column, "")?
        .iter()
        .map(|cell| {
            cell.split_whitespace()
                .map(|tok| {
                    tok.parse::<f64>().map_err(|_| {
                        FeatureflowError::PreprocessingError(format!(
                            "{}: cannot parse '{tok}' as a number",
                            column.name()
                        ))
                    })
                })
                .collect()
        })
        .collect()
}

/// Cells as unsigned 64 bit integers (h3 indexes)
pub fn u64_cells(column: &Column) -> Result<Vec<Option<u64>>> {
    if column.dtype() == &DataType::String {
        let ca = column.as_materialized_series().str()?.clone();
        return ca
            .into_iter()
            .map(|v| match v.map(str::trim) {
                None | Some("") => Ok(None),
                Some(s) => s.parse::<u64>().map(Some).map_err(|_| {
                    FeatureflowError::PreprocessingError(format!(
                        "{}: cannot parse '{s}' as an h3 index",
                        column.name()
                    ))
                }),
            })
            .collect();
    }
    let casted = column
        .cast(&DataType::UInt64)
        .map_err(|e| FeatureflowError::PreprocessingError(format!("{}: {e}", column.name())))?;
    let ca = casted.as_materialized_series().u64()?.clone();
    Ok(ca.into_iter().collect())
}
