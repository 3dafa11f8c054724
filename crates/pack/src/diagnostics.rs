//! Error/warning accumulation and TOML field readers
//!
//! Manifest loading never stops at the first problem. Every reader in this
//! module records a human-readable message and returns `None` so callers can
//! keep validating the rest of the document.

use toml::{Table, Value};

/// Collected load messages
///
/// Errors are fatal for the shaderpack as a whole; warnings are advisory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Moves all messages of `other` into `self`
    pub fn absorb(&mut self, other: Diagnostics) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Human-readable name of a TOML value type, used in error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Integer(_) => "integer",
        Value::Float(_) => "float",
        Value::Boolean(_) => "boolean",
        Value::Datetime(_) => "datetime",
        Value::Array(_) => "array",
        Value::Table(_) => "table",
    }
}

/// Returns the value of the first key in `keys` present in `table`
pub fn first_present<'a, 'k>(table: &'a Table, keys: &[&'k str]) -> Option<(&'k str, &'a Value)> {
    keys.iter().find_map(|key| table.get(*key).map(|value| (*key, value)))
}

/// Reads an optional string; a non-string value is an error
pub fn read_string(table: &Table, key: &str, context: &str, diag: &mut Diagnostics) -> Option<String> {
    match table.get(key)? {
        Value::String(value) => Some(value.clone()),
        _ => {
            diag.error(format!("Invalid string for {context}.{key}"));
            None
        }
    }
}

/// Reads a non-blank string that must be present
pub fn require_string(table: &Table, key: &str, context: &str, diag: &mut Diagnostics) -> Option<String> {
    match table.get(key).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Some(value.to_string()),
        _ => {
            diag.error(format!("Missing {context}.{key}"));
            None
        }
    }
}

/// Reads an optional boolean; a non-boolean value is an error
pub fn read_bool(table: &Table, key: &str, context: &str, diag: &mut Diagnostics) -> Option<bool> {
    match table.get(key)? {
        Value::Boolean(value) => Some(*value),
        _ => {
            diag.error(format!("Invalid boolean for {context}.{key}"));
            None
        }
    }
}

/// Reads a boolean that must be present
pub fn require_bool(table: &Table, key: &str, context: &str, diag: &mut Diagnostics) -> Option<bool> {
    if !table.contains_key(key) {
        diag.error(format!("Missing {context}.{key}"));
        return None;
    }
    read_bool(table, key, context, diag)
}

/// Reads an array of strings, reporting each non-string element
pub fn read_string_array(values: &[Value], context: &str, diag: &mut Diagnostics) -> Vec<String> {
    values
        .iter()
        .enumerate()
        .filter_map(|(i, value)| match value {
            Value::String(text) => Some(text.clone()),
            _ => {
                diag.error(format!("Invalid string in {context} at index {i}"));
                None
            }
        })
        .collect()
}

/// Reads an optional sub-table; a non-table value is an error
pub fn read_table<'a>(table: &'a Table, key: &str, context: &str, diag: &mut Diagnostics) -> Option<&'a Table> {
    match table.get(key)? {
        Value::Table(sub) => Some(sub),
        _ => {
            diag.error(format!("Invalid table for {context}.{key}"));
            None
        }
    }
}

/// Numeric view of an integer or float value
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => Some(*n as f64),
        Value::Float(n) => Some(*n),
        _ => None,
    }
}

/// Coerces an integer, integral float or numeric string to a positive `i32`-range value
pub fn coerce_positive_int(value: &Value, context: &str, diag: &mut Diagnostics) -> Option<u32> {
    let positive = |n: i64, diag: &mut Diagnostics| {
        if n <= 0 || n > i64::from(i32::MAX) {
            diag.error(format!("Invalid positive integer in {context}."));
            None
        } else {
            u32::try_from(n).ok()
        }
    };
    match value {
        Value::Integer(n) => positive(*n, diag),
        Value::Float(n) if n.fract() == 0.0 && n.is_finite() && n.abs() <= f64::from(i32::MAX) + 1.0 => positive(*n as i64, diag),
        Value::Float(_) => {
            diag.error(format!("Invalid positive integer in {context}."));
            None
        }
        Value::String(text) => match text.trim().parse::<i32>() {
            Ok(n) => positive(i64::from(n), diag),
            Err(_) => {
                diag.error(format!("Invalid integer in {context}."));
                None
            }
        },
        _ => {
            diag.error(format!("Invalid integer in {context}."));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_positive_int() {
        let t = table("a = 4\nb = 2.0\nc = ' 7 '\nd = 0\ne = 1.5\nf = 'x'\ng = true");
        let mut diag = Diagnostics::new();
        let read = |key: &str, diag: &mut Diagnostics| coerce_positive_int(&t[key], key, diag);
        assert_eq!(read("a", &mut diag), Some(4));
        assert_eq!(read("b", &mut diag), Some(2));
        assert_eq!(read("c", &mut diag), Some(7));
        assert_eq!(read("d", &mut diag), None);
        assert_eq!(read("e", &mut diag), None);
        assert_eq!(read("f", &mut diag), None);
        assert_eq!(read("g", &mut diag), None);
        assert_eq!(
            diag.errors,
            vec![
                "Invalid positive integer in d.",
                "Invalid positive integer in e.",
                "Invalid integer in f.",
                "Invalid integer in g.",
            ]
        );
    }

    fn table(source: &str) -> Table {
        toml::from_str(source).unwrap()
    }

    #[test]
    fn test_readers_record_errors() {
        let t = table("name = 'pack'\nflag = 3\nlist = ['a', 1]");
        let mut diag = Diagnostics::new();

        assert_eq!(require_string(&t, "name", "shaderpack", &mut diag).as_deref(), Some("pack"));
        assert_eq!(require_string(&t, "version", "shaderpack", &mut diag), None);
        assert_eq!(read_bool(&t, "flag", "shaderpack", &mut diag), None);
        assert_eq!(read_bool(&t, "absent", "shaderpack", &mut diag), None);
        let list = read_string_array(t.get("list").unwrap().as_array().unwrap(), "shaderpack.list", &mut diag);
        assert_eq!(list, vec!["a".to_string()]);

        assert_eq!(
            diag.errors,
            vec![
                "Missing shaderpack.version".to_string(),
                "Invalid boolean for shaderpack.flag".to_string(),
                "Invalid string in shaderpack.list at index 1".to_string(),
            ]
        );
    }

    #[test]
    fn test_first_present_respects_key_order() {
        let t = table("pingPong = 'alt'\nping_pong = 'main'");
        let (key, value) = first_present(&t, &["ping_pong", "pingPong"]).unwrap();
        assert_eq!(key, "ping_pong");
        assert_eq!(value.as_str(), Some("main"));
        assert!(first_present(&t, &["flip"]).is_none());
    }
}
