use std::{net::SocketAddr, sync::Arc};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::Authenticator;
use crate::dialer::Dialer;
use crate::error::ProxyError;
use crate::relay::Relay;
use crate::request::read_request;

pub const RESPONSE_200_CONNECT: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";
pub const RESPONSE_400: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";
pub const RESPONSE_407: &[u8] = b"HTTP/1.1 407 Proxy Authentication Required\r\n\
Proxy-Authenticate: Basic realm=\"Lightpanda\"\r\n\
Proxy-Connection: close\r\n\
\r\n";
pub const RESPONSE_502: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

/// Runs one client connection from request head to the end of the relay.
pub struct ConnectionHandler {
    auth: Arc<dyn Authenticator>,
    dialer: Arc<dyn Dialer>,
    relay: Relay,
}

impl ConnectionHandler {
    #[must_use]
    pub fn new(auth: Arc<dyn Authenticator>, dialer: Arc<dyn Dialer>, relay: Relay) -> Self {
        Self {
            auth,
            dialer,
            relay,
        }
    }

    /// Parses, authenticates and dials, then relays until done.
    ///
    /// Failures before the relay starts are answered with the status line
    /// from [`response_for`] before the error is returned. Both sockets are
    /// closed by the time this returns.
    #[tracing::instrument(skip_all, fields(client_addr = %client_addr, host = tracing::field::Empty))]
    pub async fn handle<S>(
        &self,
        cancel: &CancellationToken,
        mut client: S,
        client_addr: SocketAddr,
    ) -> Result<(), ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let cancel = cancel.child_token();
        let _cancel_on_exit = cancel.clone().drop_guard();

        let Some(read) = cancel.run_until_cancelled(read_request(&mut client)).await else {
            return Ok(());
        };
        let request = match read {
            Ok(request) => request,
            Err(e) => return Err(reject(&mut client, e).await),
        };

        tracing::Span::current().record("host", request.host.as_str());
        debug!(method = %request.method, "Handle conn");

        let mut request = match self.auth.authenticate(request).await {
            Ok(request) => request,
            Err(e) => return Err(reject(&mut client, e).await),
        };

        let mut server = match self.dialer.dial(&cancel, &request).await {
            Ok(server) => server,
            Err(e) => return Err(reject(&mut client, e).await),
        };

        if request.is_connect() {
            client
                .write_all(RESPONSE_200_CONNECT)
                .await
                .map_err(ProxyError::ClientWrite)?;
            if !request.buffered.is_empty() {
                server
                    .write_all(&request.buffered)
                    .await
                    .map_err(ProxyError::ForwardFailed)?;
            }
        } else {
            let mut head = request.encode_head();
            head.append(&mut request.buffered);
            if let Err(e) = server.write_all(&head).await {
                return Err(reject(&mut client, ProxyError::ForwardFailed(e)).await);
            }
        }

        debug!("Proxy conns");
        let result = self.relay.run(&cancel, client, server).await;
        debug!("End conn");
        result
    }
}

/// Status response matching the stage a failure happened at, if any.
#[must_use]
pub const fn response_for(err: &ProxyError) -> Option<&'static [u8]> {
    match err.status() {
        Some(400) => Some(RESPONSE_400),
        Some(407) => Some(RESPONSE_407),
        Some(502) => Some(RESPONSE_502),
        _ => None,
    }
}

/// Answers `err` with its status response and hands the error back.
///
/// The write is best effort; the connection is closed right after anyway.
async fn reject<W>(client: &mut W, err: ProxyError) -> ProxyError
where
    W: AsyncWrite + Unpin,
{
    let Some(response) = response_for(&err) else {
        return err;
    };
    if let Err(e) = client.write_all(response).await {
        debug!(error = %e, "Failed to write response");
        return err;
    }
    let _ = client.flush().await;
    err
}
