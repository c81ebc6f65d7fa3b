use serde::Serialize;

use crate::frame::Frame;

/// Descriptive summary of a loaded dataset, backing the `profile` tool.
#[derive(Debug, Clone, Serialize)]
pub struct FrameProfile {
    pub rows: usize,
    pub cols: usize,
    pub numeric_cols: Vec<String>,
    pub categorical_cols: Vec<String>,
    pub columns: Vec<ColumnProfile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub dtype: String,
    pub missing: usize,
    pub missing_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NumericSummary {
    pub mean: f64,
    pub std: Option<f64>,
    pub min: f64,
    pub max: f64,
}

pub fn profile_frame(frame: &Frame) -> FrameProfile {
    let rows = frame.n_rows();
    let mut numeric_cols = Vec::new();
    let mut categorical_cols = Vec::new();
    let mut columns = Vec::new();

    for col in frame.columns() {
        let numeric = col.is_numeric();
        if numeric {
            numeric_cols.push(col.name().to_string());
        } else {
            categorical_cols.push(col.name().to_string());
        }

        let missing = col.missing();
        let missing_pct = if rows == 0 {
            0.0
        } else {
            missing as f64 / rows as f64
        };

        let summary = if numeric {
            numeric_summary(col.cells().iter().filter_map(|c| c.as_f64()).collect())
        } else {
            None
        };

        columns.push(ColumnProfile {
            name: col.name().to_string(),
            dtype: col.dtype().to_string(),
            missing,
            missing_pct,
            numeric: summary,
        });
    }

    FrameProfile {
        rows,
        cols: frame.n_cols(),
        numeric_cols,
        categorical_cols,
        columns,
    }
}

fn numeric_summary(values: Vec<f64>) -> Option<NumericSummary> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    // Sample standard deviation, undefined for a single observation.
    let std = if values.len() > 1 {
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Some(var.sqrt())
    } else {
        None
    };
    Some(NumericSummary { mean, std, min, max })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_splits_numeric_and_categorical() {
        let frame =
            Frame::from_csv_str("age,city\n30,Oslo\n40,Bergen\n,Oslo\n").unwrap();
        let profile = profile_frame(&frame);
        assert_eq!(profile.rows, 3);
        assert_eq!(profile.cols, 2);
        assert_eq!(profile.numeric_cols, vec!["age"]);
        assert_eq!(profile.categorical_cols, vec!["city"]);

        let age = &profile.columns[0];
        assert_eq!(age.missing, 1);
        assert!((age.missing_pct - 1.0 / 3.0).abs() < 1e-12);
        let summary = age.numeric.as_ref().unwrap();
        assert_eq!(summary.mean, 35.0);
        assert_eq!(summary.min, 30.0);
        assert_eq!(summary.max, 40.0);
    }

    #[test]
    fn single_value_column_has_no_std() {
        let frame = Frame::from_csv_str("x\n5\n").unwrap();
        let profile = profile_frame(&frame);
        assert!(profile.columns[0].numeric.as_ref().unwrap().std.is_none());
    }
}
