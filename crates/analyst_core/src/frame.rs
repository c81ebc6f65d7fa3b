use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use calamine::{open_workbook_auto, Data, Reader};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to load dataset: {0}")]
    Load(String),
    #[error("dataset has no header row")]
    MissingHeader,
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),
    #[error("empty column name at position {0}")]
    EmptyColumnName(usize),
    #[error("column '{name}' has {actual} rows, expected {expected}")]
    LengthMismatch {
        name: String,
        actual: usize,
        expected: usize,
    },
    #[error("unsupported dataset format: .{0}")]
    UnsupportedFormat(String),
}

/// A single tabular value. Loaded data is inferred into the narrowest type;
/// blanks become `Null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Numeric view of the cell, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Null => "null",
            Cell::Bool(_) => "bool",
            Cell::Int(_) => "int",
            Cell::Float(_) => "float",
            Cell::Str(_) => "str",
        }
    }

    pub fn render(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Bool(b) => b.to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Str(s) => s.clone(),
        }
    }

    /// Ordering between cells of compatible types. Nulls and mixed
    /// non-numeric types do not compare.
    pub fn partial_cmp_cell(&self, other: &Cell) -> Option<Ordering> {
        match (self, other) {
            (Cell::Str(a), Cell::Str(b)) => Some(a.cmp(b)),
            (Cell::Bool(a), Cell::Bool(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

/// Parse one raw CSV field into the narrowest cell type.
fn infer_cell(raw: &str) -> Cell {
    let t = raw.trim();
    if t.is_empty() {
        return Cell::Null;
    }
    if let Ok(i) = t.parse::<i64>() {
        return Cell::Int(i);
    }
    if let Ok(f) = t.parse::<f64>() {
        return Cell::Float(f);
    }
    match t {
        "true" | "True" | "TRUE" => Cell::Bool(true),
        "false" | "False" | "FALSE" => Cell::Bool(false),
        _ => Cell::Str(t.to_string()),
    }
}

/// A named column. Cell storage is shared so cloning a frame (one view per
/// executed turn) does not copy the data.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    cells: Arc<Vec<Cell>>,
}

impl Column {
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            cells: Arc::new(cells),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn missing(&self) -> usize {
        self.cells.iter().filter(|c| c.is_null()).count()
    }

    /// Dominant non-null cell type, used as the column dtype label.
    /// Mixed int/float columns report as float.
    pub fn dtype(&self) -> &'static str {
        let mut seen: Option<&'static str> = None;
        for cell in self.cells.iter() {
            if cell.is_null() {
                continue;
            }
            let t = cell.type_name();
            match seen {
                None => seen = Some(t),
                Some(prev) if prev == t => {}
                Some("int") if t == "float" => seen = Some("float"),
                Some("float") if t == "int" => {}
                Some(_) => return "mixed",
            }
        }
        seen.unwrap_or("null")
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.dtype(), "int" | "float")
    }
}

/// The in-memory tabular dataset: an ordered set of uniquely named columns.
/// Replaced wholesale on upload; generated code only ever sees a fresh view.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Frame {
    pub fn new(columns: Vec<Column>) -> Result<Self, FrameError> {
        let n_rows = columns.first().map(|c| c.cells.len()).unwrap_or(0);
        let mut seen = BTreeSet::new();
        for (i, col) in columns.iter().enumerate() {
            if col.name.is_empty() {
                return Err(FrameError::EmptyColumnName(i));
            }
            if !seen.insert(col.name.clone()) {
                return Err(FrameError::DuplicateColumn(col.name.clone()));
            }
            if col.cells.len() != n_rows {
                return Err(FrameError::LengthMismatch {
                    name: col.name.clone(),
                    actual: col.cells.len(),
                    expected: n_rows,
                });
            }
        }
        Ok(Self { columns, n_rows })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_set(&self) -> BTreeSet<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn row(&self, i: usize) -> Vec<Cell> {
        self.columns
            .iter()
            .map(|c| c.cells.get(i).cloned().unwrap_or(Cell::Null))
            .collect()
    }

    /// Replace or append a column, keeping column order stable.
    pub fn with_column(&self, name: &str, cells: Vec<Cell>) -> Result<Frame, FrameError> {
        let expected = if self.columns.is_empty() {
            cells.len()
        } else {
            self.n_rows
        };
        if cells.len() != expected {
            return Err(FrameError::LengthMismatch {
                name: name.to_string(),
                actual: cells.len(),
                expected,
            });
        }
        let mut columns = self.columns.clone();
        let replacement = Column::new(name, cells);
        match columns.iter_mut().find(|c| c.name == name) {
            Some(slot) => *slot = replacement,
            None => columns.push(replacement),
        }
        Frame::new(columns)
    }

    /// Keep only the rows where `mask` is true. The mask length must match.
    pub fn filter_rows(&self, mask: &[bool]) -> Result<Frame, FrameError> {
        if mask.len() != self.n_rows {
            return Err(FrameError::LengthMismatch {
                name: "<mask>".to_string(),
                actual: mask.len(),
                expected: self.n_rows,
            });
        }
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let cells = c
                    .cells
                    .iter()
                    .zip(mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(cell, _)| cell.clone())
                    .collect();
                Column::new(c.name.clone(), cells)
            })
            .collect();
        Frame::new(columns)
    }

    pub fn head(&self, n: usize) -> Frame {
        let take = n.min(self.n_rows);
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), c.cells[..take].to_vec()))
            .collect();
        Frame {
            columns,
            n_rows: take,
        }
    }

    /// Stable sort by one column; nulls and incomparable cells sort last.
    pub fn sort_by(&self, name: &str, ascending: bool) -> Option<Frame> {
        let key = self.column(name)?;
        let mut order: Vec<usize> = (0..self.n_rows).collect();
        order.sort_by(|&a, &b| {
            let cmp = key.cells[a]
                .partial_cmp_cell(&key.cells[b])
                .unwrap_or(Ordering::Greater);
            if ascending {
                cmp
            } else {
                cmp.reverse()
            }
        });
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let cells = order.iter().map(|&i| c.cells[i].clone()).collect();
                Column::new(c.name.clone(), cells)
            })
            .collect();
        Some(Frame {
            columns,
            n_rows: self.n_rows,
        })
    }

    pub fn from_path(path: &Path) -> Result<Frame, FrameError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "tsv" | "txt" => Frame::from_csv_path(path),
            "xlsx" | "xls" | "xlsb" | "ods" => Frame::from_workbook_path(path),
            other => Err(FrameError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn from_csv_path(path: &Path) -> Result<Frame, FrameError> {
        let mut file = fs_err::File::open(path).map_err(|e| FrameError::Load(e.to_string()))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| FrameError::Load(e.to_string()))?;
        Frame::from_csv_str(&content)
    }

    pub fn from_csv_str(content: &str) -> Result<Frame, FrameError> {
        let delimiter = sniff_delimiter(content);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());

        let names: Vec<String> = reader
            .headers()
            .map_err(|e| FrameError::Load(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if names.is_empty() || names.iter().all(|n| n.is_empty()) {
            return Err(FrameError::MissingHeader);
        }

        let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); names.len()];
        for record in reader.records() {
            let record = record.map_err(|e| FrameError::Load(e.to_string()))?;
            for (i, column) in cells.iter_mut().enumerate() {
                // Short records pad with nulls; extra fields are dropped.
                column.push(record.get(i).map(infer_cell).unwrap_or(Cell::Null));
            }
        }

        let columns = names
            .into_iter()
            .zip(cells)
            .map(|(name, cells)| Column::new(name, cells))
            .collect();
        Frame::new(columns)
    }

    pub fn from_workbook_path(path: &Path) -> Result<Frame, FrameError> {
        let mut workbook =
            open_workbook_auto(path).map_err(|e| FrameError::Load(e.to_string()))?;
        let sheet = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| FrameError::Load("workbook has no sheets".to_string()))?;
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| FrameError::Load(e.to_string()))?;

        let mut rows = range.rows();
        let header = rows.next().ok_or(FrameError::MissingHeader)?;
        let names: Vec<String> = header.iter().map(|d| d.to_string().trim().to_string()).collect();
        if names.is_empty() || names.iter().all(|n| n.is_empty()) {
            return Err(FrameError::MissingHeader);
        }

        let mut cells: Vec<Vec<Cell>> = vec![Vec::new(); names.len()];
        for row in rows {
            for (i, column) in cells.iter_mut().enumerate() {
                column.push(row.get(i).map(workbook_cell).unwrap_or(Cell::Null));
            }
        }

        let columns = names
            .into_iter()
            .zip(cells)
            .map(|(name, cells)| Column::new(name, cells))
            .collect();
        Frame::new(columns)
    }
}

fn workbook_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Null,
        Data::String(s) => {
            if s.trim().is_empty() {
                Cell::Null
            } else {
                Cell::Str(s.trim().to_string())
            }
        }
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
                Cell::Int(*f as i64)
            } else {
                Cell::Float(*f)
            }
        }
        Data::Int(i) => Cell::Int(*i),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => Cell::Float(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Str(s.clone()),
        Data::Error(_) => Cell::Null,
    }
}

/// Detect the most likely field delimiter by checking consistency across the
/// first few lines: the candidate with the most consistent field count (>1)
/// wins, higher field counts breaking ties.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample: Vec<&str> = content.lines().take(10).collect();
    if sample.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;
    for &delim in candidates {
        let counts: Vec<usize> = sample
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();
        let target = counts[0];
        if target <= 1 {
            continue;
        }
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::from_csv_str("age,income,city\n31,50000,Oslo\n45,72000.5,Bergen\n28,,Oslo\n")
            .unwrap()
    }

    #[test]
    fn csv_loads_with_inferred_types() {
        let frame = sample();
        assert_eq!(frame.n_rows(), 3);
        assert_eq!(frame.column_names(), vec!["age", "income", "city"]);
        assert_eq!(frame.column("age").unwrap().dtype(), "int");
        assert_eq!(frame.column("income").unwrap().dtype(), "float");
        assert_eq!(frame.column("city").unwrap().dtype(), "str");
        assert_eq!(frame.column("income").unwrap().missing(), 1);
    }

    #[test]
    fn semicolon_delimiter_is_sniffed() {
        let frame = Frame::from_csv_str("a;b\n1;2\n3;4\n").unwrap();
        assert_eq!(frame.column_names(), vec!["a", "b"]);
        assert_eq!(frame.n_rows(), 2);
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let err = Frame::from_csv_str("a,a\n1,2\n").unwrap_err();
        assert!(matches!(err, FrameError::DuplicateColumn(name) if name == "a"));
    }

    #[test]
    fn filter_and_head() {
        let frame = sample();
        let filtered = frame.filter_rows(&[true, false, true]).unwrap();
        assert_eq!(filtered.n_rows(), 2);
        assert_eq!(filtered.column("city").unwrap().cells()[1], Cell::Str("Oslo".into()));
        assert_eq!(frame.head(2).n_rows(), 2);
        assert_eq!(frame.head(10).n_rows(), 3);
    }

    #[test]
    fn sort_by_descending_puts_nulls_last() {
        let frame = sample();
        let sorted = frame.sort_by("income", false).unwrap();
        let cells = sorted.column("income").unwrap().cells().to_vec();
        assert_eq!(cells[0], Cell::Float(72000.5));
        assert_eq!(cells[2], Cell::Null);
    }

    #[test]
    fn with_column_replaces_in_place() {
        let frame = sample();
        let updated = frame
            .with_column("age", vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)])
            .unwrap();
        assert_eq!(updated.column_names(), frame.column_names());
        assert_eq!(updated.column("age").unwrap().cells()[0], Cell::Int(1));
    }
}
