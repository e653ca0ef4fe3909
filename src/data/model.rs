use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ---------------------------------------------------------------------------
// CellValue – a single cell in a dataset column
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value mirroring common dataframe dtypes.
/// Used as a key in `BTreeSet` filters, so `CellValue` must be `Ord`.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// ISO-8601 date string kept as text for simplicity.
    Date(String),
    Null,
}

// -- Manual Eq/Ord so we can put CellValue in BTreeSet --

impl Eq for CellValue {}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use CellValue::*;
        fn discriminant(v: &CellValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Date(_) => 5,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) | (Date(a), Date(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for CellValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellValue::String(s) | CellValue::Date(s) => s.hash(state),
            CellValue::Integer(i) => i.hash(state),
            CellValue::Float(f) => f.to_bits().hash(state),
            CellValue::Bool(b) => b.hash(state),
            CellValue::Null => {}
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::String(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Date(d) => write!(f, "{d}"),
            CellValue::Null => Ok(()),
        }
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        if v.is_nan() {
            CellValue::Null
        } else {
            CellValue::Float(v)
        }
    }
}

impl From<Option<f64>> for CellValue {
    fn from(v: Option<f64>) -> Self {
        v.map_or(CellValue::Null, CellValue::from)
    }
}

impl From<usize> for CellValue {
    fn from(v: usize) -> Self {
        CellValue::Integer(v as i64)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::String(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::String(v)
    }
}

impl CellValue {
    /// Try to interpret the value as an `f64` for numeric analysis.
    /// NaN floats are reported as missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) if !v.is_nan() => Some(*v),
            CellValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Borrow the text of a string-like cell.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) | CellValue::Date(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

// ---------------------------------------------------------------------------
// Row – one record of the dataset
// ---------------------------------------------------------------------------

/// A single dataset row: column_name → value.
pub type Row = BTreeMap<String, CellValue>;

// ---------------------------------------------------------------------------
// Dataset – an ordered table of rows
// ---------------------------------------------------------------------------

/// A row-oriented table with a stable column order.
///
/// Columns are only ever appended; derivation steps (feature extraction,
/// sigma computation, batch classification) add columns and keep row order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// All rows, in input order.
    pub rows: Vec<Row>,
    /// Column names in first-seen order.
    pub column_names: Vec<String>,
}

impl Dataset {
    /// Build a dataset from rows, collecting columns in first-seen order.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut column_names: Vec<String> = Vec::new();
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for row in &rows {
            for col in row.keys() {
                if seen.insert(col.as_str()) {
                    column_names.push(col.clone());
                }
            }
        }
        Dataset { column_names, rows }
    }

    /// Build a dataset with an explicit column order.
    pub fn with_columns(column_names: Vec<String>, rows: Vec<Row>) -> Self {
        Dataset { rows, column_names }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_names.iter().any(|c| c == name)
    }

    /// Cell at `(row, column)`; absent cells read as `Null`.
    pub fn get(&self, row: usize, column: &str) -> &CellValue {
        const NULL: CellValue = CellValue::Null;
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&NULL)
    }

    /// Numeric view of a column. Non-numeric or missing cells are `None`.
    pub fn column_f64(&self, column: &str) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|r| r.get(column).and_then(CellValue::as_f64))
            .collect()
    }

    /// Textual view of a column.
    pub fn column_str(&self, column: &str) -> Vec<Option<&str>> {
        self.rows
            .iter()
            .map(|r| r.get(column).and_then(CellValue::as_str))
            .collect()
    }

    /// Set (or overwrite) a whole column. `values` must have one entry per row.
    pub fn set_column<I, V>(&mut self, column: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<CellValue>,
    {
        if !self.has_column(column) {
            self.column_names.push(column.to_string());
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(column.to_string(), value.into());
        }
    }

    /// Column-wise concatenation: row `i` of `other` is merged into row `i`
    /// of `self`. Rows beyond `other.len()` are left untouched.
    pub fn append_columns(&mut self, other: &Dataset) {
        for col in &other.column_names {
            if !self.has_column(col) {
                self.column_names.push(col.clone());
            }
        }
        for (row, extra) in self.rows.iter_mut().zip(&other.rows) {
            for (k, v) in extra {
                row.insert(k.clone(), v.clone());
            }
        }
    }

    /// New dataset containing only the rows at `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> Dataset {
        Dataset {
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
            column_names: self.column_names.clone(),
        }
    }

    /// Stable sort of the rows by a column. Nulls sort first, matching the
    /// `Ord` impl of [`CellValue`].
    pub fn sort_by_column(&mut self, column: &str) {
        self.rows.sort_by(|a, b| {
            let va = a.get(column).unwrap_or(&CellValue::Null);
            let vb = b.get(column).unwrap_or(&CellValue::Null);
            va.cmp(vb)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, CellValue)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_ordering_by_type_then_value() {
        assert!(CellValue::Null < CellValue::Bool(false));
        assert!(CellValue::Integer(5) < CellValue::Float(0.0));
        assert!(CellValue::Float(1.0) < CellValue::Float(2.0));
        assert!(CellValue::String("a".into()) < CellValue::String("b".into()));
    }

    #[test]
    fn test_nan_is_missing() {
        assert_eq!(CellValue::from(f64::NAN), CellValue::Null);
        assert_eq!(CellValue::Float(f64::NAN).as_f64(), None);
        assert_eq!(CellValue::Integer(3).as_f64(), Some(3.0));
    }

    #[test]
    fn test_columns_keep_first_seen_order() {
        let ds = Dataset::from_rows(vec![
            row(&[("b", CellValue::Integer(1)), ("a", CellValue::Integer(2))]),
            row(&[("c", CellValue::Null)]),
        ]);
        // BTreeMap iteration is sorted within a row; first row contributes a, b.
        assert_eq!(ds.column_names, vec!["a", "b", "c"]);
        assert_eq!(ds.get(1, "a"), &CellValue::Null);
    }

    #[test]
    fn test_append_columns_preserves_rows() {
        let mut ds = Dataset::from_rows(vec![
            row(&[("x", CellValue::Integer(1))]),
            row(&[("x", CellValue::Integer(2))]),
        ]);
        let extra = Dataset::from_rows(vec![
            row(&[("y", CellValue::Float(0.5))]),
            row(&[("y", CellValue::Float(1.5))]),
        ]);
        ds.append_columns(&extra);
        assert_eq!(ds.column_names, vec!["x", "y"]);
        assert_eq!(ds.column_f64("y"), vec![Some(0.5), Some(1.5)]);
        assert_eq!(ds.column_f64("x"), vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_sort_by_column_is_stable() {
        let mut ds = Dataset::from_rows(vec![
            row(&[("d", "2024-02".into()), ("i", CellValue::Integer(0))]),
            row(&[("d", "2024-01".into()), ("i", CellValue::Integer(1))]),
            row(&[("d", "2024-02".into()), ("i", CellValue::Integer(2))]),
        ]);
        ds.sort_by_column("d");
        assert_eq!(
            ds.column_f64("i"),
            vec![Some(1.0), Some(0.0), Some(2.0)]
        );
    }
}
