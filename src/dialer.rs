use std::io;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ProxyError;
use crate::request::Request;

pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Opens the outbound connection a request asks for.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        cancel: &CancellationToken,
        request: &Request,
    ) -> Result<TcpStream, ProxyError>;
}

/// Plain TCP connection straight to the origin, one per client connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectTcp;

#[async_trait]
impl Dialer for DirectTcp {
    async fn dial(
        &self,
        cancel: &CancellationToken,
        request: &Request,
    ) -> Result<TcpStream, ProxyError> {
        let addr = target_addr(&request.host);
        debug!(target_addr = %addr, "Direct TCP dial");

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(io::Error::new(io::ErrorKind::Interrupted, "dial canceled")),
            result = TcpStream::connect(addr.as_str()) => result,
        };

        result.map_err(|source| ProxyError::DialFailed { addr, source })
    }
}

/// Appends the default HTTP port unless `host` already names one.
#[must_use]
pub fn target_addr(host: &str) -> String {
    let has_port = if let Some(rest) = host.strip_prefix('[') {
        rest.split_once(']')
            .is_some_and(|(_, tail)| tail.starts_with(':'))
    } else {
        host.contains(':')
    };

    if has_port {
        host.to_string()
    } else {
        format!("{host}:{DEFAULT_HTTP_PORT}")
    }
}
