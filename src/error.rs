use std::fmt;

/// Message used when an HTTP status falls outside `[200, 300)`.
pub const SERVER_ERROR_MESSAGE: &str = "Request Server Error";
/// Fallback message for business failures without a readable message.
pub const DEFAULT_LOGIC_ERROR_MSG_UNKNOWN: &str = "Unknown Error";

/// Coarse classification of a [`RequestError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// The transport exchange did not complete (connection error, timeout, abort).
    Network,
    /// The transport completed but the HTTP status was outside `[200, 300)`.
    Server,
    /// HTTP succeeded but the business retcode signals failure.
    Logic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Server => "server",
            Self::Logic => "logic",
        };
        f.write_str(name)
    }
}

/// Error type returned by this crate.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// Transport-level failure reported by the adapter.
    #[error("network error: {message}")]
    Network { message: String },
    /// Non-success HTTP status code.
    #[error("server error {status_code}: {message}")]
    Server { status_code: u16, message: String },
    /// Business retcode rejected by the configured white list.
    #[error("logic error (retcode {}): {message}", display_retcode(.retcode))]
    Logic {
        /// Business status read from the response body, if any.
        retcode: Option<i64>,
        /// Human readable message derived from the response body.
        message: String,
    },
}

fn display_retcode(retcode: &Option<i64>) -> String {
    retcode.map_or_else(|| "none".to_owned(), |code| code.to_string())
}

impl RequestError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn server(status_code: u16) -> Self {
        Self::Server {
            status_code,
            message: SERVER_ERROR_MESSAGE.to_owned(),
        }
    }

    pub fn logic(retcode: Option<i64>, message: impl Into<String>) -> Self {
        Self::Logic {
            retcode,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Server { .. } => ErrorKind::Server,
            Self::Logic { .. } => ErrorKind::Logic,
        }
    }

    /// The bare message, without the kind prefix used by `Display`.
    pub fn message(&self) -> &str {
        match self {
            Self::Network { message } | Self::Server { message, .. } | Self::Logic { message, .. } => {
                message
            }
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Server { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    pub fn retcode(&self) -> Option<i64> {
        match self {
            Self::Logic { retcode, .. } => *retcode,
            _ => None,
        }
    }

    /// Logic failures are final; everything else may be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind() != ErrorKind::Logic
    }
}

/// Failure reported by an [`Adapter`](crate::Adapter) when the transport
/// exchange could not complete.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    aborted: bool,
    timed_out: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            aborted: false,
            timed_out: false,
        }
    }

    /// The task was cancelled through its [`TaskHandle`](crate::TaskHandle).
    pub fn aborted() -> Self {
        Self {
            message: "Request Abort".to_owned(),
            aborted: true,
            timed_out: false,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            message: "Request Timeout".to_owned(),
            aborted: false,
            timed_out: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            let mut out = Self::timed_out();
            out.message = format!("Request Timeout: {err}");
            out
        } else {
            Self::new(format!("Request Error: {err}"))
        }
    }
}

impl From<TransportError> for RequestError {
    fn from(err: TransportError) -> Self {
        Self::network(err.message)
    }
}
