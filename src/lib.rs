//! `ctx-request` is an async HTTP request client built around a per-call
//! [`Context`] threaded through one pipeline:
//!
//! 1. configuration layers (defaults, instance, per call) are merged,
//! 2. outbound plugins transform the request,
//! 3. the dispatch engine drives a pluggable [`Adapter`] with timeout and
//!    retry,
//! 4. inbound plugins transform the response and the business retcode is
//!    checked.
//!
//! Failures surface as [`RequestError`] with one of three kinds:
//! network, server (HTTP status) or logic (business retcode).

mod adapter;
mod classify;
mod client;
mod context;
mod dispatch;
mod error;
mod options;
mod plugins;
mod reqwest_adapter;

pub use adapter::{Adapter, AdapterTask, TaskFuture, TaskHandle, TaskId, TaskRegistry};
pub use classify::{check_business, logic_error_message, normalize_retcode, read_retcode};
pub use client::Client;
pub use context::{
    Body, Context, Ext, RequestConfig, RequestOptions, Response, ResponseType, X_REQUEST_ID,
    X_REQUEST_TIME,
};
pub use dispatch::{CompleteHook, DispatchEngine, MISSING_RESPONSE_MESSAGE};
pub use error::{
    ErrorKind, RequestError, TransportError, DEFAULT_LOGIC_ERROR_MSG_UNKNOWN, SERVER_ERROR_MESSAGE,
};
pub use options::{ExtOptions, ExtOverrides, DEFAULT_LOGIC_ERROR_MSG_KEY, DEFAULT_RETCODE_KEY};
pub use plugins::{PluginFn, PluginPipe};
pub use reqwest::Method;
pub use reqwest_adapter::ReqwestAdapter;

pub type Result<T> = std::result::Result<T, RequestError>;
