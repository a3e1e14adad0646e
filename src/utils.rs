// Helper module for parsing YouTube's string values
pub mod youtube_parse {
    pub fn parse_float(s: &str) -> Option<f64> {
        s.trim().parse::<f64>().ok()
    }

    pub fn parse_int(s: &str) -> Option<i64> {
        s.trim().parse::<i64>().ok()
    }

    /// Only the literal "true" is true.
    pub fn parse_bool(s: &str) -> bool {
        s == "true"
    }
}

/// `deserialize_with` adapters for payload fields that arrive as strings.
/// Plain JSON numbers and booleans are accepted as well.
pub(crate) mod wire {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use serde_json::Value;

    use super::youtube_parse;

    fn number<E: Error>(value: &Value) -> Result<f64, E> {
        match value {
            Value::String(s) => youtube_parse::parse_float(s)
                .ok_or_else(|| E::custom(format!("expected a numeric string, got {:?}", s))),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| E::custom(format!("number out of range: {}", n))),
            other => Err(E::custom(format!("expected a number, got {}", other))),
        }
    }

    pub(crate) fn f64_from_str<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        number(&Value::deserialize(d)?)
    }

    pub(crate) fn opt_f64_from_str<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<f64>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            Value::String(s) if s.is_empty() => Ok(None),
            value => number(&value).map(Some),
        }
    }

    pub(crate) fn i64_from_str<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        match Value::deserialize(d)? {
            Value::String(s) => youtube_parse::parse_int(&s)
                .ok_or_else(|| D::Error::custom(format!("expected an integer string, got {:?}", s))),
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| D::Error::custom(format!("expected an integer, got {}", n))),
            other => Err(D::Error::custom(format!("expected an integer, got {}", other))),
        }
    }

    pub(crate) fn bool_from_str<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => youtube_parse::parse_bool(&s),
            Value::Bool(b) => b,
            _ => false,
        })
    }
}
