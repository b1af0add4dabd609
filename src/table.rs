//! Table columns consumed by the legend
//!
//! A [`TableColumn`] is either scalar (numbers) or an enum (labels). Nulls
//! are kept in place so that legends can show a null swatch. Columns can be
//! built from plain vectors, JSON arrays or polars data frames.

use crate::legend::error::Result;
use polars::prelude::*;
use std::collections::HashSet;

/// Whether a column holds numbers or categorical labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Scalar,
    Enum,
}

#[derive(Debug, Clone, PartialEq)]
enum ColumnValues {
    Scalar(Vec<Option<f64>>),
    Enum(Vec<Option<String>>),
}

/// One named column of a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    name: String,
    values: ColumnValues,
}

impl TableColumn {
    /// Numeric column; NaN and infinities are treated as null
    pub fn scalar(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        let values = values
            .into_iter()
            .map(|v| v.filter(|v| v.is_finite()))
            .collect();
        Self {
            name: name.into(),
            values: ColumnValues::Scalar(values),
        }
    }

    pub fn categorical(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::Enum(values),
        }
    }

    /// Infer the kind from JSON values: numbers (and nulls) make a scalar
    /// column, anything else an enum.
    pub fn from_json_values(name: impl Into<String>, values: &[serde_json::Value]) -> Self {
        let all_numeric = values.iter().all(|v| v.is_number() || v.is_null());
        if all_numeric {
            Self::scalar(name, values.iter().map(|v| v.as_f64()).collect())
        } else {
            let labels = values
                .iter()
                .map(|v| match v {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
                .collect();
            Self::categorical(name, labels)
        }
    }

    /// Build from a polars series; numeric dtypes become scalar columns.
    pub fn from_series(series: &Series) -> Result<Self> {
        let name = series.name().to_string();
        let dtype = series.dtype();
        if dtype.is_float() || dtype.is_integer() {
            let values = series
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .collect();
            return Ok(Self::scalar(name, values));
        }

        let labels = if matches!(dtype, DataType::String) {
            series
                .str()?
                .into_iter()
                .map(|v| v.map(str::to_string))
                .collect()
        } else {
            series
                .cast(&DataType::String)?
                .str()?
                .into_iter()
                .map(|v| v.map(str::to_string))
                .collect()
        };
        Ok(Self::categorical(name, labels))
    }

    pub fn from_frame(df: &DataFrame, column: &str) -> Result<Self> {
        let col = df.column(column)?;
        Self::from_series(col.as_materialized_series())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ColumnKind {
        match self.values {
            ColumnValues::Scalar(_) => ColumnKind::Scalar,
            ColumnValues::Enum(_) => ColumnKind::Enum,
        }
    }

    pub fn is_enum(&self) -> bool {
        self.kind() == ColumnKind::Enum
    }

    pub fn len(&self) -> usize {
        match &self.values {
            ColumnValues::Scalar(v) => v.len(),
            ColumnValues::Enum(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_nulls(&self) -> bool {
        match &self.values {
            ColumnValues::Scalar(v) => v.iter().any(Option::is_none),
            ColumnValues::Enum(v) => v.iter().any(Option::is_none),
        }
    }

    /// Numeric value of each row (None for nulls and enum columns)
    pub fn values(&self) -> Vec<Option<f64>> {
        match &self.values {
            ColumnValues::Scalar(v) => v.clone(),
            ColumnValues::Enum(v) => vec![None; v.len()],
        }
    }

    /// Label of each row; numbers are rendered as text
    pub fn labels(&self) -> Vec<Option<String>> {
        match &self.values {
            ColumnValues::Scalar(v) => v.iter().map(|v| v.map(|v| v.to_string())).collect(),
            ColumnValues::Enum(v) => v.clone(),
        }
    }

    /// Non-null numbers, in row order
    pub fn numerical_values(&self) -> Vec<f64> {
        match &self.values {
            ColumnValues::Scalar(v) => v.iter().flatten().copied().collect(),
            ColumnValues::Enum(_) => Vec::new(),
        }
    }

    pub fn minimum_value(&self) -> Option<f64> {
        self.numerical_values().into_iter().reduce(f64::min)
    }

    pub fn maximum_value(&self) -> Option<f64> {
        self.numerical_values().into_iter().reduce(f64::max)
    }

    /// Distinct non-null labels in order of first appearance
    pub fn unique_values(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.labels()
            .into_iter()
            .flatten()
            .filter(|label| seen.insert(label.clone()))
            .collect()
    }
}
