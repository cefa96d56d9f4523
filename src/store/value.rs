// ABOUTME: Engine-neutral cell values and column-major result sets
// ABOUTME: Adapters convert driver rows into these; the transfer engine transposes them into row tuples

/// One cell, independent of the engine it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// A row tuple in the positional order of its column list.
pub type Row = Vec<Value>;

impl Value {
    /// Integer view of a cell. Floats are truncated, text is parsed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.is_finite() => Some(v.trunc() as i64),
            Value::Text(s) => s.trim().parse::<i64>().ok().or_else(|| {
                s.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(|v| v.trunc() as i64)
            }),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Strip the `\0` padding fixed-width character columns carry on both ends.
    pub fn trim_null_padding(self) -> Self {
        match self {
            Value::Text(s) if s.starts_with('\0') || s.ends_with('\0') => {
                Value::Text(s.trim_matches('\0').to_string())
            }
            other => other,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Query result in column-major form: one vector of cells per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Build from row-major tuples, as drivers hand them out.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let mut data: Vec<Vec<Value>> = columns
            .iter()
            .map(|_| Vec::with_capacity(rows.len()))
            .collect();
        for row in rows {
            for (idx, value) in row.into_iter().enumerate() {
                if let Some(column) = data.get_mut(idx) {
                    column.push(value);
                }
            }
        }
        Self { columns, data }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.data.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Cells of one column, matched case-insensitively.
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.data.get(idx))
            .map(Vec::as_slice)
    }

    /// First non-null integer in a column, for `TOP 1`/`LIMIT 1` probes.
    pub fn first_i64(&self, name: &str) -> Option<i64> {
        self.column(name)?.first().and_then(Value::as_i64)
    }

    pub fn trim_null_padding(&mut self) {
        for column in &mut self.data {
            for value in column.iter_mut() {
                let taken = std::mem::replace(value, Value::Null);
                *value = taken.trim_null_padding();
            }
        }
    }

    /// Transpose into row tuples in column order.
    pub fn into_rows(self) -> Vec<Row> {
        let count = self.row_count();
        let mut rows: Vec<Row> = (0..count)
            .map(|_| Vec::with_capacity(self.columns.len()))
            .collect();
        for column in self.data {
            for (row, value) in rows.iter_mut().zip(column) {
                row.push(value);
            }
        }
        rows
    }
}
