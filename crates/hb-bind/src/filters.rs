//! Filters available to bind templates
//!
//! Helm-flavoured names so existing bind templates read the same:
//! - `b64enc` / `b64dec`: base64 encode and decode
//! - `quote`: wrap a value in double quotes
//! - `required`: fail with a message when a value is undefined

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{Error, ErrorKind, Value};

/// Usage: `{{ .Values.password | b64enc }}`
pub fn b64enc(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Usage: `{{ .Values.encoded | b64dec }}`
pub fn b64dec(value: &str) -> Result<String, Error> {
    let bytes = STANDARD.decode(value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("base64 decode error: {}", e),
        )
    })?;
    String::from_utf8(bytes).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("base64 decode produced invalid UTF-8: {}", e),
        )
    })
}

/// Usage: `{{ .Values.host | quote }}`
pub fn quote(value: Value) -> String {
    let raw = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Usage: `{{ .Values.user | required("user is required") }}`
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() {
        Err(Error::new(
            ErrorKind::UndefinedError,
            message.unwrap_or_else(|| "required value is undefined".to_string()),
        ))
    } else {
        Ok(value)
    }
}
