//! Command-line parameters in, JSON rows out.

use cassandra_pool::{CqlValue, Row};
use eyre::{Result, WrapErr};
use serde_json::{Map, Value};

/// Parse `type:value` arguments into bound parameters
pub fn parse_params(raw: &[String]) -> Result<Vec<CqlValue>> {
    raw.iter().map(|param| parse_param(param)).collect()
}

fn parse_param(raw: &str) -> Result<CqlValue> {
    let Some((kind, value)) = raw.split_once(':') else {
        return Ok(CqlValue::Text(raw.to_string()));
    };

    let parsed = match kind.to_ascii_lowercase().as_str() {
        "text" | "varchar" => CqlValue::Text(value.to_string()),
        "ascii" => CqlValue::Ascii(value.to_string()),
        "int" => CqlValue::Int(value.parse().wrap_err_with(|| format!("invalid int '{}'", value))?),
        "bigint" => CqlValue::BigInt(value.parse().wrap_err_with(|| format!("invalid bigint '{}'", value))?),
        "smallint" => CqlValue::SmallInt(value.parse().wrap_err_with(|| format!("invalid smallint '{}'", value))?),
        "tinyint" => CqlValue::TinyInt(value.parse().wrap_err_with(|| format!("invalid tinyint '{}'", value))?),
        "boolean" | "bool" => CqlValue::Boolean(value.parse().wrap_err_with(|| format!("invalid boolean '{}'", value))?),
        "double" => CqlValue::Double(value.parse().wrap_err_with(|| format!("invalid double '{}'", value))?),
        "float" => CqlValue::Float(value.parse().wrap_err_with(|| format!("invalid float '{}'", value))?),
        // Not a type prefix, e.g. "host:port"
        _ => return Ok(CqlValue::Text(raw.to_string())),
    };
    Ok(parsed)
}

/// Render rows as a JSON array of objects
pub fn rows_to_json(rows: &[Row]) -> Value {
    Value::Array(
        rows.iter()
            .map(|row| {
                let mut object = Map::new();
                let mut columns: Vec<_> = row.iter().collect();
                columns.sort_by(|a, b| a.0.cmp(b.0));
                for (name, value) in columns {
                    object.insert(name.clone(), value.as_ref().map_or(Value::Null, to_json));
                }
                Value::Object(object)
            })
            .collect(),
    )
}

fn to_json(value: &CqlValue) -> Value {
    match value {
        CqlValue::Text(s) | CqlValue::Ascii(s) => Value::String(s.clone()),
        CqlValue::Boolean(b) => Value::Bool(*b),
        CqlValue::Int(n) => Value::from(*n),
        CqlValue::BigInt(n) => Value::from(*n),
        CqlValue::SmallInt(n) => Value::from(*n),
        CqlValue::TinyInt(n) => Value::from(*n),
        CqlValue::Counter(c) => Value::from(c.0),
        CqlValue::Double(n) => Value::from(*n),
        CqlValue::Float(n) => Value::from(*n),
        CqlValue::Uuid(u) => Value::String(u.to_string()),
        CqlValue::Inet(ip) => Value::String(ip.to_string()),
        CqlValue::Blob(bytes) => Value::String(bytes.iter().map(|b| format!("{:02x}", b)).collect()),
        CqlValue::Empty => Value::Null,
        CqlValue::List(items) | CqlValue::Set(items) => Value::Array(items.iter().map(to_json).collect()),
        CqlValue::Map(entries) => Value::Array(
            entries
                .iter()
                .map(|(k, v)| Value::Array(vec![to_json(k), to_json(v)]))
                .collect(),
        ),
        CqlValue::Tuple(items) => Value::Array(
            items
                .iter()
                .map(|item| item.as_ref().map_or(Value::Null, to_json))
                .collect(),
        ),
        other => Value::String(format!("{:?}", other)),
    }
}
