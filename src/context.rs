use std::{
    collections::BTreeMap,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{ExtOptions, ExtOverrides, TaskId};

pub const X_REQUEST_ID: &str = "X-Request-Id";
pub const X_REQUEST_TIME: &str = "X-Request-Time";

/// Request body handed to the adapter.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// Structured body. Serialized as JSON, or as query parameters on GET.
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

/// How the adapter should decode the response body.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ResponseType {
    /// Parse as JSON, falling back to a JSON string when the body is not JSON.
    #[default]
    Json,
    /// Keep the body as a JSON string.
    Text,
    /// Keep the raw bytes as a JSON array of numbers.
    Bytes,
}

/// Outbound request as seen by plugins and adapters.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestConfig {
    pub url: String,
    pub method: Method,
    pub header: BTreeMap<String, String>,
    pub data: Option<Body>,
    /// Transport-level timeout in milliseconds, enforced by the adapter itself.
    pub timeout_ms: Option<u64>,
    pub response_type: ResponseType,
    /// Adapter-specific pass-through fields.
    pub extra: Map<String, Value>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: Method::GET,
            header: BTreeMap::new(),
            data: None,
            timeout_ms: None,
            response_type: ResponseType::default(),
            extra: Map::new(),
        }
    }
}

/// Raw result of a transport attempt, and the resolved value of a call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Response {
    pub status_code: u16,
    pub data: Value,
    pub header: BTreeMap<String, String>,
}

impl Response {
    pub fn new(status_code: u16, data: Value) -> Self {
        Self {
            status_code,
            data,
            header: BTreeMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Decodes the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.data.clone())
    }
}

/// A call descriptor: the request plus per-call configuration overrides.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub req: RequestConfig,
    pub ext: ExtOverrides,
}

impl RequestOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            req: RequestConfig {
                url: url.into(),
                ..RequestConfig::default()
            },
            ext: ExtOverrides::default(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.req.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.req.header.insert(name.into(), value.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.req.data = Some(Body::Json(body));
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.req.data = Some(Body::Text(body.into()));
        self
    }

    pub fn bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.req.data = Some(Body::Bytes(body.into()));
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.req.response_type = response_type;
        self
    }

    pub fn ext(mut self, ext: ExtOverrides) -> Self {
        self.ext = ext;
        self
    }
}

impl From<&str> for RequestOptions {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for RequestOptions {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

impl From<RequestConfig> for RequestOptions {
    fn from(req: RequestConfig) -> Self {
        Self {
            req,
            ext: ExtOverrides::default(),
        }
    }
}

/// Merged configuration plus runtime bookkeeping of one call.
#[derive(Clone, Debug)]
pub struct Ext {
    /// Snapshot of the merged configuration. `options.repeat_num` counts down.
    pub options: ExtOptions,
    pub task_id: TaskId,
    /// The request URL without its query string.
    pub url_without_query: String,
    /// Unix milliseconds stamped into `X-Request-Time`.
    pub request_time_ms: Option<u64>,
    /// Time from `request_time_ms` to the end of the latest attempt.
    pub request_cost_time: Option<Duration>,
    /// Transport attempts started so far.
    pub attempts: u32,
}

impl Ext {
    pub(crate) fn record_cost(&mut self) {
        if !self.options.x_request_time {
            return;
        }
        if let Some(start) = self.request_time_ms {
            self.request_cost_time = Some(Duration::from_millis(unix_millis().saturating_sub(start)));
        }
    }
}

/// Per-call state threaded through plugins and the dispatch loop.
///
/// `res` stays `None` until an attempt returns a status in `[200, 300)`.
#[derive(Clone, Debug)]
pub struct Context {
    pub req: RequestConfig,
    pub res: Option<Response>,
    pub ext: Ext,
}

impl Context {
    /// Builds the context for one call from the three configuration layers.
    pub fn new(
        defaults: &ExtOptions,
        instance: &ExtOverrides,
        instance_headers: &BTreeMap<String, String>,
        call: RequestOptions,
        task_id: TaskId,
    ) -> Self {
        let RequestOptions { mut req, ext } = call;
        let options = defaults.merged(instance).merged(&ext);

        let mut header = instance_headers.clone();
        header.append(&mut req.header);
        req.header = header;

        if !options.base_url.is_empty() && !has_scheme(&req.url) {
            req.url = format!("{}{}", options.base_url, req.url);
        }
        let url_without_query = strip_query(&req.url).to_owned();

        Self {
            req,
            res: None,
            ext: Ext {
                options,
                task_id,
                url_without_query,
                request_time_ms: None,
                request_cost_time: None,
                attempts: 0,
            },
        }
    }

    /// Stamps the `X-Request-Id` / `X-Request-Time` headers when enabled.
    pub fn instrument(&mut self) {
        if self.ext.options.x_request_id {
            let id = uuid::Uuid::new_v4().simple().to_string();
            self.req.header.insert(X_REQUEST_ID.to_owned(), id);
        }
        if self.ext.options.x_request_time {
            let now = unix_millis();
            self.ext.request_time_ms = Some(now);
            self.req.header.insert(X_REQUEST_TIME.to_owned(), now.to_string());
        }
    }
}

/// `scheme://...` per RFC 3986: a letter followed by letters, digits, `+`, `-` or `.`.
fn has_scheme(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(head, _)| head)
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
