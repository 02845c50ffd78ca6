use std::fmt;

/// Reserved cell value meaning "this column has no value for this source".
pub const UNDEFINED: i32 = 0x0FFF_FFFF;

/// Identifier of one categorical dimension (e.g. layer, side).
/// Names, ranges and the meaning of ids are owned by the geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column(pub u16);

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col{}", self.0)
    }
}

/// One (column, cell value) pair of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Value {
    pub column: Column,
    pub value: i32,
}

impl Value {
    pub const fn new(column: Column, value: i32) -> Self {
        Self { column, value }
    }

    /// A value marking the column as present but without a defined cell.
    pub const fn undefined(column: Column) -> Self {
        Self {
            column,
            value: UNDEFINED,
        }
    }

    pub const fn is_undefined(&self) -> bool {
        self.value == UNDEFINED
    }
}

/// Returns the display string for a cell value in folder paths.
/// Zero is hidden so single-valued columns read as plain names.
pub fn value_suffix(value: i32) -> String {
    match value {
        UNDEFINED => "_UNDEFINED".to_string(),
        0 => String::new(),
        v => format!("_{v}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_value_as_map_key() {
        let mut map: HashMap<Value, u32> = HashMap::new();
        let v = Value::new(Column(3), 7);
        map.insert(v, 42);
        assert_eq!(map.get(&v), Some(&42));
    }

    #[test]
    fn test_value_equality() {
        let a = Value::new(Column(1), 2);
        let b = Value::new(Column(1), 2);
        let c = Value::new(Column(1), 3);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_undefined_value() {
        let v = Value::undefined(Column(4));
        assert!(v.is_undefined());
        assert_eq!(v.value, UNDEFINED);
        assert!(!Value::new(Column(4), 0).is_undefined());
    }

    #[test]
    fn test_value_ordering_is_column_first() {
        let a = Value::new(Column(1), 100);
        let b = Value::new(Column(2), 0);
        assert!(a < b);
    }

    #[test]
    fn test_value_suffix() {
        assert_eq!(value_suffix(0), "");
        assert_eq!(value_suffix(3), "_3");
        assert_eq!(value_suffix(-2), "_-2");
        assert_eq!(value_suffix(UNDEFINED), "_UNDEFINED");
    }
}
