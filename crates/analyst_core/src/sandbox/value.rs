//! Runtime values for the restricted executor. Everything generated code can
//! touch is one of these; there is no object model beyond them.

use crate::frame::{Cell, Frame};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// Insertion-ordered string-keyed mapping (groupby results, dict literals).
    Mapping(Vec<(String, Value)>),
    Series(Series),
    Frame(Frame),
    GroupBy(GroupBy),
    GroupedSeries(GroupedSeries),
    Namespace(Namespace),
    Method(Box<BoundMethod>),
}

/// The fixed namespaces exposed to generated code besides `df`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Num,
    Arr,
    Plot,
}

impl Namespace {
    pub fn name(&self) -> &'static str {
        match self {
            Namespace::Num => "num",
            Namespace::Arr => "arr",
            Namespace::Plot => "plot",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundMethod {
    pub recv: Value,
    pub name: String,
}

/// A single named column of values, detached from its frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub cells: Vec<Cell>,
}

impl Series {
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn non_null_count(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_null()).count()
    }

    /// Non-null cells as f64, failing on any non-numeric value.
    pub fn numeric_values(&self) -> Result<Vec<f64>, String> {
        let mut values = Vec::with_capacity(self.cells.len());
        for cell in &self.cells {
            if cell.is_null() {
                continue;
            }
            match cell.as_f64() {
                Some(v) => values.push(v),
                None => {
                    return Err(format!(
                        "column '{}' contains non-numeric value '{}'",
                        self.name,
                        cell.render()
                    ))
                }
            }
        }
        Ok(values)
    }

    fn non_empty_numeric(&self) -> Result<Vec<f64>, String> {
        let values = self.numeric_values()?;
        if values.is_empty() {
            Err(format!("column '{}' has no numeric values", self.name))
        } else {
            Ok(values)
        }
    }

    pub fn mean(&self) -> Result<f64, String> {
        let values = self.non_empty_numeric()?;
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    pub fn sum(&self) -> Result<f64, String> {
        Ok(self.numeric_values()?.iter().sum())
    }

    pub fn min(&self) -> Result<f64, String> {
        let values = self.non_empty_numeric()?;
        Ok(values.iter().cloned().fold(f64::INFINITY, f64::min))
    }

    pub fn max(&self) -> Result<f64, String> {
        let values = self.non_empty_numeric()?;
        Ok(values.iter().cloned().fold(f64::NEG_INFINITY, f64::max))
    }

    pub fn median(&self) -> Result<f64, String> {
        let mut values = self.non_empty_numeric()?;
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            Ok((values[mid - 1] + values[mid]) / 2.0)
        } else {
            Ok(values[mid])
        }
    }

    /// Sample standard deviation.
    pub fn std(&self) -> Result<f64, String> {
        let values = self.non_empty_numeric()?;
        if values.len() < 2 {
            return Err(format!(
                "column '{}' needs at least two values for std",
                self.name
            ));
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Ok(var.sqrt())
    }

    /// Pearson correlation over pairwise non-null numeric rows.
    pub fn corr(&self, other: &Series) -> Result<f64, String> {
        if self.cells.len() != other.cells.len() {
            return Err(format!(
                "columns '{}' and '{}' have different lengths",
                self.name, other.name
            ));
        }
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for (a, b) in self.cells.iter().zip(&other.cells) {
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                xs.push(x);
                ys.push(y);
            }
        }
        if xs.len() < 2 {
            return Err(format!(
                "columns '{}' and '{}' have fewer than two paired numeric values",
                self.name, other.name
            ));
        }
        let n = xs.len() as f64;
        let mx = xs.iter().sum::<f64>() / n;
        let my = ys.iter().sum::<f64>() / n;
        let mut cov = 0.0;
        let mut vx = 0.0;
        let mut vy = 0.0;
        for (x, y) in xs.iter().zip(&ys) {
            cov += (x - mx) * (y - my);
            vx += (x - mx).powi(2);
            vy += (y - my).powi(2);
        }
        if vx == 0.0 || vy == 0.0 {
            return Err("correlation is undefined for a constant column".to_string());
        }
        Ok(cov / (vx.sqrt() * vy.sqrt()))
    }

    /// Distinct non-null cells in first-seen order.
    pub fn unique(&self) -> Vec<Cell> {
        let mut seen: Vec<Cell> = Vec::new();
        for cell in &self.cells {
            if cell.is_null() || seen.contains(cell) {
                continue;
            }
            seen.push(cell.clone());
        }
        seen
    }

    /// Occurrence counts per distinct value, most frequent first.
    pub fn value_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(Cell, usize)> = Vec::new();
        for cell in &self.cells {
            if cell.is_null() {
                continue;
            }
            match counts.iter_mut().find(|(c, _)| c == cell) {
                Some((_, n)) => *n += 1,
                None => counts.push((cell.clone(), 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts
            .into_iter()
            .map(|(cell, n)| (cell.render(), n))
            .collect()
    }

    pub fn head(&self, n: usize) -> Series {
        Series::new(
            self.name.clone(),
            self.cells.iter().take(n).cloned().collect(),
        )
    }

    pub fn dropna(&self) -> Series {
        Series::new(
            self.name.clone(),
            self.cells.iter().filter(|c| !c.is_null()).cloned().collect(),
        )
    }

    /// Sorted copy; nulls and incomparable cells go last.
    pub fn sort_values(&self, ascending: bool) -> Series {
        let mut cells = self.cells.clone();
        cells.sort_by(|a, b| {
            let cmp = a
                .partial_cmp_cell(b)
                .unwrap_or(std::cmp::Ordering::Greater);
            if ascending {
                cmp
            } else {
                cmp.reverse()
            }
        });
        Series::new(self.name.clone(), cells)
    }
}

/// A frame grouped by one key column, awaiting column selection.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub frame: Frame,
    pub key: String,
}

/// One selected column split into per-group series, in first-seen key order.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedSeries {
    pub key_name: String,
    pub value_name: String,
    pub groups: Vec<(String, Series)>,
}

impl Value {
    pub fn from_cell(cell: Cell) -> Value {
        match cell {
            Cell::Null => Value::None,
            Cell::Bool(b) => Value::Bool(b),
            Cell::Int(i) => Value::Int(i),
            Cell::Float(f) => Value::Float(f),
            Cell::Str(s) => Value::Str(s),
        }
    }

    pub fn to_cell(&self) -> Result<Cell, String> {
        match self {
            Value::None => Ok(Cell::Null),
            Value::Bool(b) => Ok(Cell::Bool(*b)),
            Value::Int(i) => Ok(Cell::Int(*i)),
            Value::Float(f) => Ok(Cell::Float(*f)),
            Value::Str(s) => Ok(Cell::Str(s.clone())),
            other => Err(format!(
                "cannot store a {} inside a column",
                other.type_name()
            )),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Mapping(_) => "mapping",
            Value::Series(_) => "series",
            Value::Frame(_) => "frame",
            Value::GroupBy(_) => "groupby",
            Value::GroupedSeries(_) => "grouped series",
            Value::Namespace(_) => "namespace",
            Value::Method(_) => "method",
        }
    }

    pub fn truthy(&self) -> Result<bool, String> {
        match self {
            Value::None => Ok(false),
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Float(f) => Ok(*f != 0.0),
            Value::Str(s) => Ok(!s.is_empty()),
            Value::List(items) => Ok(!items.is_empty()),
            Value::Mapping(items) => Ok(!items.is_empty()),
            other => Err(format!(
                "truth value of a {} is ambiguous",
                other.type_name()
            )),
        }
    }

    /// Human-readable rendering for answers and error messages.
    pub fn render(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(b) => {
                if *b {
                    "True".to_string()
                } else {
                    "False".to_string()
                }
            }
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.render()).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Mapping(items) => {
                let inner: Vec<String> = items
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.render()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Series(s) => {
                let inner: Vec<String> = s.cells.iter().map(|c| c.render()).collect();
                format!("{} [{}]", s.name, inner.join(", "))
            }
            Value::Frame(f) => format!("frame of {} rows x {} columns", f.n_rows(), f.n_cols()),
            Value::GroupBy(g) => format!("frame grouped by '{}'", g.key),
            Value::GroupedSeries(g) => {
                format!("'{}' grouped by '{}'", g.value_name, g.key_name)
            }
            Value::Namespace(ns) => format!("<{}>", ns.name()),
            Value::Method(m) => format!("<method {}>", m.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(cells: Vec<Cell>) -> Series {
        Series::new("x", cells)
    }

    #[test]
    fn mean_skips_nulls() {
        let s = series(vec![Cell::Int(2), Cell::Null, Cell::Int(4)]);
        assert_eq!(s.mean().unwrap(), 3.0);
        assert_eq!(s.non_null_count(), 2);
    }

    #[test]
    fn mean_of_text_column_fails() {
        let s = series(vec![Cell::Str("a".into())]);
        assert!(s.mean().unwrap_err().contains("non-numeric"));
    }

    #[test]
    fn median_of_even_count_averages_middle_pair() {
        let s = series(vec![Cell::Int(1), Cell::Int(3), Cell::Int(2), Cell::Int(10)]);
        assert_eq!(s.median().unwrap(), 2.5);
    }

    #[test]
    fn value_counts_orders_by_frequency() {
        let s = series(vec![
            Cell::Str("a".into()),
            Cell::Str("b".into()),
            Cell::Str("a".into()),
        ]);
        assert_eq!(s.value_counts(), vec![("a".to_string(), 2), ("b".to_string(), 1)]);
    }

    #[test]
    fn unique_preserves_first_seen_order() {
        let s = series(vec![Cell::Int(2), Cell::Int(1), Cell::Int(2), Cell::Null]);
        assert_eq!(s.unique(), vec![Cell::Int(2), Cell::Int(1)]);
    }

    #[test]
    fn correlation_of_linear_series_is_one() {
        let a = series(vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)]);
        let b = Series::new("y", vec![Cell::Int(2), Cell::Int(4), Cell::Int(6)]);
        assert!((a.corr(&b).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn truthiness_of_series_is_ambiguous() {
        let v = Value::Series(series(vec![Cell::Int(1)]));
        assert!(v.truthy().is_err());
    }
}
