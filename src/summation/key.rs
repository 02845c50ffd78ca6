use std::fmt;

use super::column::{Column, Value};

/// Ordered, duplicate-free set of column values identifying one table slot.
///
/// Entries keep insertion order: the seed-column order after extraction, or
/// the grouping order after a regroup. Folder paths follow this order.
/// Keys compare lexicographically over their entries.
#[derive(Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    values: Vec<Value>,
}

impl Clone for Key {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
        }
    }

    /// Reuses the existing buffer; no allocation once capacity suffices.
    fn clone_from(&mut self, source: &Self) {
        self.values.clone_from(&source.values);
    }
}

impl Key {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    /// Builds a key from values, later duplicates replacing earlier ones.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let mut key = Self::new();
        for v in values {
            key.put(v);
        }
        key
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    pub fn contains(&self, column: Column) -> bool {
        self.values.iter().any(|v| v.column == column)
    }

    /// Returns the value for `column`, or an UNDEFINED value when absent.
    pub fn get(&self, column: Column) -> Value {
        self.values
            .iter()
            .find(|v| v.column == column)
            .copied()
            .unwrap_or(Value::undefined(column))
    }

    /// Inserts or replaces the value for its column.
    pub fn put(&mut self, value: Value) {
        match self.values.iter_mut().find(|v| v.column == value.column) {
            Some(slot) => slot.value = value.value,
            None => self.values.push(value),
        }
    }

    /// Removes `column`, returning its value if it was present.
    pub fn erase(&mut self, column: Column) -> Option<Value> {
        let pos = self.values.iter().position(|v| v.column == column)?;
        Some(self.values.remove(pos))
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Returns a new key holding exactly `columns`, in that order.
    /// Columns missing from `self` come out UNDEFINED.
    pub fn project(&self, columns: &[Column]) -> Key {
        let mut out = Key::with_capacity(columns.len());
        for &c in columns {
            out.put(self.get(c));
        }
        out
    }

    /// Whether any entry carries the UNDEFINED sentinel.
    pub fn has_undefined(&self) -> bool {
        self.values.iter().any(Value::is_undefined)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", v.column, v.value)?;
        }
        f.write_str("}")
    }
}
