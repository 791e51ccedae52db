use std::{collections::BTreeMap, time::Duration};

use reqwest::{header, Method};
use serde_json::{Map, Value};

use crate::{Adapter, AdapterTask, Body, RequestConfig, Response, ResponseType, TransportError};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Default transport backed by `reqwest`. Each attempt runs on its own tokio
/// task so it can be aborted.
#[derive(Clone, Debug, Default)]
pub struct ReqwestAdapter {
    http: reqwest::Client,
}

impl ReqwestAdapter {
    /// Uses a preconfigured `reqwest` client (proxies, TLS roots, ...).
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Adapter for ReqwestAdapter {
    fn send(&self, req: &RequestConfig) -> AdapterTask {
        let http = self.http.clone();
        let req = req.clone();
        AdapterTask::spawn(execute(http, req))
    }
}

async fn execute(http: reqwest::Client, req: RequestConfig) -> Result<Response, TransportError> {
    let is_get = req.method == Method::GET;
    let has_content_type = req
        .header
        .keys()
        .any(|name| name.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()));

    let mut builder = http.request(req.method.clone(), &req.url);
    for (name, value) in &req.header {
        builder = builder.header(name, value);
    }
    if req.method == Method::POST && !has_content_type {
        builder = builder.header(header::CONTENT_TYPE, JSON_CONTENT_TYPE);
    }
    if let Some(timeout_ms) = req.timeout_ms.filter(|ms| *ms > 0) {
        builder = builder.timeout(Duration::from_millis(timeout_ms));
    }

    builder = match req.data {
        Some(Body::Json(Value::Object(fields))) if is_get => builder.query(&query_pairs(&fields)),
        Some(Body::Json(_)) if is_get => builder,
        Some(Body::Json(value)) => {
            let body = serde_json::to_vec(&value)
                .map_err(|err| TransportError::new(format!("Request Error: {err}")))?;
            builder.body(body)
        }
        Some(Body::Text(text)) => builder.body(text),
        Some(Body::Bytes(bytes)) => builder.body(bytes),
        None => builder,
    };

    let response = builder.send().await?;
    let status_code = response.status().as_u16();
    let header = collect_headers(response.headers());
    let bytes = response.bytes().await?;

    Ok(Response {
        status_code,
        data: decode_body(&bytes, req.response_type),
        header,
    })
}

fn query_pairs(fields: &Map<String, Value>) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect()
}

fn collect_headers(headers: &header::HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect()
}

fn decode_body(bytes: &[u8], response_type: ResponseType) -> Value {
    match response_type {
        ResponseType::Json if bytes.is_empty() => Value::Null,
        ResponseType::Json => serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
        ResponseType::Text => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ResponseType::Bytes => Value::Array(bytes.iter().map(|byte| Value::from(*byte)).collect()),
    }
}
