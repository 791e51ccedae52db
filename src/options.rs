use std::{fmt, sync::Arc};

use serde::{de::Error as _, Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::{error::DEFAULT_LOGIC_ERROR_MSG_UNKNOWN, Adapter, ReqwestAdapter};

/// Canonical body field holding the business status code.
pub const DEFAULT_RETCODE_KEY: &str = "retcode";
/// Default body field holding the business failure message.
pub const DEFAULT_LOGIC_ERROR_MSG_KEY: &str = "message";

/// Fully resolved request configuration.
///
/// A client is constructed with one of these as its immutable defaults; the
/// instance and per-call layers are [`ExtOverrides`] applied on top of it.
#[derive(Clone)]
pub struct ExtOptions {
    /// Prefix for relative request URLs.
    pub base_url: String,
    /// Attempt timeout in milliseconds, `0` disables it.
    pub timeout_ms: u64,
    /// Retries remaining after the first attempt. Consumed in place by the
    /// dispatch loop on the per-call copy.
    pub repeat_num: u32,
    /// Adds an `X-Request-Id` header with a random id.
    pub x_request_id: bool,
    /// Adds an `X-Request-Time` header and records the request cost.
    pub x_request_time: bool,
    /// Body field carrying the business status, `None` disables the check.
    pub retcode_key: Option<String>,
    /// Non-zero codes also treated as success, `None` disables the check.
    pub retcode_white_list: Option<Vec<i64>>,
    /// Body field (or `a.b` path) carrying the business failure message.
    pub logic_error_msg_key: Option<String>,
    /// Message used when the body carries none.
    pub logic_error_msg_unknown: String,
    /// Transport used for every attempt.
    pub adapter: Arc<dyn Adapter>,
    /// Opaque fields passed through for plugins.
    pub extra: Map<String, Value>,
}

impl Default for ExtOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: 0,
            repeat_num: 2,
            x_request_id: true,
            x_request_time: true,
            retcode_key: Some(DEFAULT_RETCODE_KEY.to_owned()),
            retcode_white_list: Some(Vec::new()),
            logic_error_msg_key: Some(DEFAULT_LOGIC_ERROR_MSG_KEY.to_owned()),
            logic_error_msg_unknown: DEFAULT_LOGIC_ERROR_MSG_UNKNOWN.to_owned(),
            adapter: Arc::new(ReqwestAdapter::default()),
            extra: Map::new(),
        }
    }
}

impl fmt::Debug for ExtOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtOptions")
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("repeat_num", &self.repeat_num)
            .field("x_request_id", &self.x_request_id)
            .field("x_request_time", &self.x_request_time)
            .field("retcode_key", &self.retcode_key)
            .field("retcode_white_list", &self.retcode_white_list)
            .field("logic_error_msg_key", &self.logic_error_msg_key)
            .field("logic_error_msg_unknown", &self.logic_error_msg_unknown)
            .field("adapter", &"<adapter>")
            .field("extra", &self.extra)
            .finish()
    }
}

impl ExtOptions {
    /// Returns a copy with `overrides` applied.
    pub fn merged(&self, overrides: &ExtOverrides) -> Self {
        let mut out = self.clone();
        overrides.apply_to(&mut out);
        out
    }
}

/// A partial configuration layer. Unset fields leave the lower layer alone.
///
/// Deserializes from the camelCase JSON shape (`baseUrl`, `repeatNum`,
/// `retcodeKey`, ...). `retcodeKey`, `retcodeWhiteList` and
/// `logicErrorMsgKey` accept `false` to disable the feature. Unknown keys
/// are kept in [`ExtOverrides::extra`].
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtOverrides {
    pub base_url: Option<String>,
    #[serde(rename = "timeout")]
    pub timeout_ms: Option<u64>,
    pub repeat_num: Option<u32>,
    pub x_request_id: Option<bool>,
    pub x_request_time: Option<bool>,
    #[serde(default, deserialize_with = "value_or_false")]
    pub retcode_key: Option<Option<String>>,
    #[serde(default, deserialize_with = "value_or_false")]
    pub retcode_white_list: Option<Option<Vec<i64>>>,
    #[serde(default, deserialize_with = "value_or_false")]
    pub logic_error_msg_key: Option<Option<String>>,
    pub logic_error_msg_unknown: Option<String>,
    #[serde(skip)]
    pub adapter: Option<Arc<dyn Adapter>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl fmt::Debug for ExtOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtOverrides")
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("repeat_num", &self.repeat_num)
            .field("x_request_id", &self.x_request_id)
            .field("x_request_time", &self.x_request_time)
            .field("retcode_key", &self.retcode_key)
            .field("retcode_white_list", &self.retcode_white_list)
            .field("logic_error_msg_key", &self.logic_error_msg_key)
            .field("logic_error_msg_unknown", &self.logic_error_msg_unknown)
            .field("adapter", &self.adapter.as_ref().map(|_| "<adapter>"))
            .field("extra", &self.extra)
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ValueOrFlag<T> {
    Value(T),
    Flag(bool),
}

fn value_or_false<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match ValueOrFlag::<T>::deserialize(deserializer)? {
        ValueOrFlag::Value(value) => Ok(Some(Some(value))),
        ValueOrFlag::Flag(false) => Ok(Some(None)),
        ValueOrFlag::Flag(true) => Err(D::Error::custom(
            "expected a value or `false`, got `true`",
        )),
    }
}

impl ExtOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn repeat_num(mut self, repeat_num: u32) -> Self {
        self.repeat_num = Some(repeat_num);
        self
    }

    pub fn x_request_id(mut self, enabled: bool) -> Self {
        self.x_request_id = Some(enabled);
        self
    }

    pub fn x_request_time(mut self, enabled: bool) -> Self {
        self.x_request_time = Some(enabled);
        self
    }

    pub fn retcode_key(mut self, key: impl Into<String>) -> Self {
        self.retcode_key = Some(Some(key.into()));
        self
    }

    /// Turns the business retcode check off.
    pub fn disable_retcode(mut self) -> Self {
        self.retcode_key = Some(None);
        self
    }

    pub fn retcode_white_list(mut self, codes: impl Into<Vec<i64>>) -> Self {
        self.retcode_white_list = Some(Some(codes.into()));
        self
    }

    /// Turns the business retcode check off through the white list switch.
    pub fn disable_white_list(mut self) -> Self {
        self.retcode_white_list = Some(None);
        self
    }

    pub fn logic_error_msg_key(mut self, key: impl Into<String>) -> Self {
        self.logic_error_msg_key = Some(Some(key.into()));
        self
    }

    pub fn logic_error_msg_unknown(mut self, message: impl Into<String>) -> Self {
        self.logic_error_msg_unknown = Some(message.into());
        self
    }

    pub fn adapter(mut self, adapter: impl Adapter + 'static) -> Self {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Writes every set field into `target`.
    pub fn apply_to(&self, target: &mut ExtOptions) {
        if let Some(base_url) = &self.base_url {
            target.base_url.clone_from(base_url);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            target.timeout_ms = timeout_ms;
        }
        if let Some(repeat_num) = self.repeat_num {
            target.repeat_num = repeat_num;
        }
        if let Some(enabled) = self.x_request_id {
            target.x_request_id = enabled;
        }
        if let Some(enabled) = self.x_request_time {
            target.x_request_time = enabled;
        }
        if let Some(key) = &self.retcode_key {
            target.retcode_key.clone_from(key);
        }
        if let Some(codes) = &self.retcode_white_list {
            target.retcode_white_list.clone_from(codes);
        }
        if let Some(key) = &self.logic_error_msg_key {
            target.logic_error_msg_key.clone_from(key);
        }
        if let Some(message) = &self.logic_error_msg_unknown {
            target.logic_error_msg_unknown.clone_from(message);
        }
        if let Some(adapter) = &self.adapter {
            target.adapter = Arc::clone(adapter);
        }
        for (key, value) in &self.extra {
            target.extra.insert(key.clone(), value.clone());
        }
    }

    /// Folds `other` into this layer, `other` winning per key.
    pub fn merge(&mut self, other: ExtOverrides) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(
            base_url,
            timeout_ms,
            repeat_num,
            x_request_id,
            x_request_time,
            retcode_key,
            retcode_white_list,
            logic_error_msg_key,
            logic_error_msg_unknown,
            adapter
        );
        self.extra.extend(other.extra);
    }
}
