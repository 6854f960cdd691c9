use std::io;
use thiserror::Error;

/// Every way a proxied connection (or the server itself) can fail.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("request head exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("read request: {0}")]
    RequestRead(#[source] io::Error),

    /// Reserved: nothing rejects HTTP/2 explicitly yet.
    #[error("unsupported protocol")]
    UnsupportedProtocol,

    /// Reserved: every method is currently accepted.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("no proxy credentials supplied")]
    NoAuth,

    #[error("malformed proxy credentials")]
    MalformedCredentials,

    #[error("invalid proxy credentials")]
    InvalidAuth,

    #[error("dial {addr}: {source}")]
    DialFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("write response: {0}")]
    ClientWrite(#[source] io::Error),

    #[error("forward request: {0}")]
    ForwardFailed(#[source] io::Error),

    #[error("copy {direction}: {source}")]
    RelayIo {
        direction: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("proxy timeout")]
    ProxyTimeout,

    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept: {0}")]
    Accept(#[source] io::Error),
}

impl ProxyError {
    /// Status code written back to the client for this failure, if the
    /// connection is still at a stage where a status line makes sense.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::RequestTooLarge { .. }
            | Self::MalformedRequest(_)
            | Self::RequestRead(_)
            | Self::UnsupportedProtocol
            | Self::UnsupportedMethod(_) => Some(400),
            Self::NoAuth | Self::MalformedCredentials | Self::InvalidAuth => Some(407),
            Self::DialFailed { .. } | Self::ForwardFailed(_) => Some(502),
            Self::ClientWrite(_)
            | Self::RelayIo { .. }
            | Self::ProxyTimeout
            | Self::Bind { .. }
            | Self::Accept(_) => None,
        }
    }

    /// Expected outcomes are logged at debug rather than error.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(self, Self::NoAuth | Self::ProxyTimeout)
    }
}
