//! Business-layer classification of successful HTTP responses.

use serde_json::Value;

use crate::{options::DEFAULT_RETCODE_KEY, ExtOptions, RequestError, Result};

/// Copies the configured retcode field into the canonical `retcode` field so
/// plugins and the predicate see one name.
pub fn normalize_retcode(data: &mut Value, opts: &ExtOptions) {
    let Some(key) = opts.retcode_key.as_deref() else {
        return;
    };
    if key == DEFAULT_RETCODE_KEY {
        return;
    }
    if let Value::Object(map) = data {
        let value = map.get(key).cloned().unwrap_or(Value::Null);
        map.insert(DEFAULT_RETCODE_KEY.to_owned(), value);
    }
}

/// Reads the canonical retcode as an integer. Floats without a fractional
/// part (`0.0`) count as integers.
pub fn read_retcode(data: &Value) -> Option<i64> {
    let value = data.get(DEFAULT_RETCODE_KEY)?;
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|code| code.fract() == 0.0 && code.abs() < i64::MAX as f64)
            .map(|code| code as i64)
    })
}

/// Accepts the body when the business check is disabled, or when the
/// retcode is `0` or white listed. Otherwise returns a logic error.
pub fn check_business(data: &Value, opts: &ExtOptions) -> Result<()> {
    let (Some(_), Some(white_list)) = (&opts.retcode_key, &opts.retcode_white_list) else {
        return Ok(());
    };

    let retcode = read_retcode(data);
    match retcode {
        Some(0) => Ok(()),
        Some(code) if white_list.contains(&code) => Ok(()),
        _ => Err(RequestError::logic(retcode, logic_error_message(data, opts))),
    }
}

/// Derives the failure message from `logic_error_msg_key`; a dotted key is
/// read as a two-level path when the flat field is missing.
pub fn logic_error_message(data: &Value, opts: &ExtOptions) -> String {
    let Some(key) = opts.logic_error_msg_key.as_deref() else {
        return opts.logic_error_msg_unknown.clone();
    };

    let direct = data.get(key).and_then(message_text);
    let nested = || {
        let (outer, inner) = key.split_once('.')?;
        let inner = inner.split('.').next().unwrap_or(inner);
        data.get(outer)?.get(inner).and_then(message_text)
    };

    direct
        .or_else(nested)
        .unwrap_or_else(|| opts.logic_error_msg_unknown.clone())
}

fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
