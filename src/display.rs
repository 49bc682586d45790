use std::fmt;
use std::fmt::Formatter;

use crate::reflect::{StructValue, Value};

impl fmt::Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Enum(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => {
                let formatted: Vec<String> = items.iter().map(|v| format!("{v}")).collect();
                write!(f, "[{}]", formatted.join(", "))
            }
            Value::Struct(sv) => write!(f, "{sv}"),
        }
    }
}

impl fmt::Display for StructValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}

impl Value {
    /// Header row for [`Value::to_csv_row`]: the flattened field paths.
    pub fn csv_header(&self) -> String {
        self.flatten()
            .into_iter()
            .map(|(path, _)| csv_escape(&path))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// One CSV row: every leaf value from `flatten()`, comma-joined and
    /// quoted per RFC 4180 where a field contains a comma, quote, or
    /// newline.
    pub fn to_csv_row(&self) -> String {
        self.flatten()
            .into_iter()
            .map(|(_, value)| csv_escape(&value.to_string()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
