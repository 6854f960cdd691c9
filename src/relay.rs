//! Bidirectional byte relay between the client and the origin.
//!
//! Two copy tasks share one session token. Whichever finishes first, by EOF
//! or by error, cancels the session so its sibling stops too. The session
//! also ends when the parent token fires or when the relay ceiling elapses.

use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ProxyError;

/// Hard ceiling on the lifetime of a single relay.
pub const CONN_MAX_DURATION: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone, Copy)]
pub struct Relay {
    max_duration: Duration,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(CONN_MAX_DURATION)
    }
}

impl Relay {
    #[must_use]
    pub const fn new(max_duration: Duration) -> Self {
        Self { max_duration }
    }

    /// Copies bytes both ways until one side is done.
    ///
    /// Returns `Ok(())` on a clean end of traffic or when `cancel` fires,
    /// [`ProxyError::ProxyTimeout`] when the ceiling is hit, and the first
    /// copy error otherwise. Both copy tasks have stopped when this returns.
    pub async fn run<C, S>(
        &self,
        cancel: &CancellationToken,
        client: C,
        server: S,
    ) -> Result<(), ProxyError>
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session = cancel.child_token();

        // Room for both copy errors so neither task blocks on reporting.
        let (errors_tx, mut errors_rx) = mpsc::channel(2);

        let (client_reader, client_writer) = tokio::io::split(client);
        let (server_reader, server_writer) = tokio::io::split(server);

        let upstream = tokio::spawn(copy_half(
            client_reader,
            server_writer,
            "cli to srv",
            session.clone(),
            errors_tx.clone(),
        ));
        let downstream = tokio::spawn(copy_half(
            server_reader,
            client_writer,
            "srv to cli",
            session.clone(),
            errors_tx,
        ));

        // Copy tasks report before canceling, so a pending error always wins.
        let result = tokio::select! {
            biased;
            Some(err) = errors_rx.recv() => Err(err),
            () = session.cancelled() => Ok(()),
            () = tokio::time::sleep(self.max_duration) => Err(ProxyError::ProxyTimeout),
        };

        session.cancel();
        let _ = tokio::join!(upstream, downstream);

        debug!("End proxy");
        result
    }
}

async fn copy_half<R, W>(
    mut reader: R,
    mut writer: W,
    direction: &'static str,
    session: CancellationToken,
    errors: mpsc::Sender<ProxyError>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = session
        .run_until_cancelled(tokio::io::copy(&mut reader, &mut writer))
        .await;

    match copied {
        Some(Ok(bytes)) => debug!(direction, bytes, "End copy"),
        Some(Err(source)) => {
            let _ = errors.try_send(ProxyError::RelayIo { direction, source });
        }
        None => debug!(direction, "Copy canceled"),
    }

    session.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        pin::Pin,
        task::{Context, Poll},
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadBuf, duplex},
        task::JoinHandle,
        time::timeout,
    };

    const TEST_TIMEOUT: Duration = Duration::from_secs(1);

    /// Client-side app end, server-side app end and the running relay.
    fn start_relay(
        relay: Relay,
        cancel: &CancellationToken,
    ) -> (
        DuplexStream,
        DuplexStream,
        JoinHandle<Result<(), ProxyError>>,
    ) {
        let (client_app, client_proxy) = duplex(4096);
        let (server_proxy, server_app) = duplex(4096);
        let cancel = cancel.clone();
        let handle =
            tokio::spawn(async move { relay.run(&cancel, client_proxy, server_proxy).await });
        (client_app, server_app, handle)
    }

    /// Stream whose reads always fail.
    struct BrokenStream;

    impl AsyncRead for BrokenStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
        }
    }

    impl AsyncWrite for BrokenStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    mod traffic {
        use super::*;

        #[tokio::test]
        async fn copies_both_directions() {
            let cancel = CancellationToken::new();
            let (mut client, mut server, relay) = start_relay(Relay::default(), &cancel);

            client.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 4];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");

            server.write_all(b"pong").await.unwrap();
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"pong");

            drop(client);
            let result = timeout(TEST_TIMEOUT, relay).await.unwrap().unwrap();
            assert!(result.is_ok());
        }

        #[tokio::test]
        async fn clean_close_ends_relay_without_error() {
            let cancel = CancellationToken::new();
            let (mut client, mut server, relay) = start_relay(Relay::default(), &cancel);

            let payload = vec![0x5A; 3000];
            client.write_all(&payload).await.unwrap();
            drop(client);

            let mut received = Vec::new();
            timeout(TEST_TIMEOUT, server.read_to_end(&mut received))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(received, payload);

            let result = timeout(TEST_TIMEOUT, relay).await.unwrap().unwrap();
            assert!(result.is_ok());
        }

        #[tokio::test]
        async fn copy_error_is_reported() {
            let (_client_app, client_proxy) = duplex(64);
            let result = timeout(
                TEST_TIMEOUT,
                Relay::default().run(&CancellationToken::new(), client_proxy, BrokenStream),
            )
            .await
            .unwrap();

            assert!(matches!(
                result,
                Err(ProxyError::RelayIo {
                    direction: "srv to cli",
                    ..
                })
            ));
        }
    }

    mod termination {
        use super::*;

        #[tokio::test]
        async fn parent_cancel_is_not_an_error() {
            let cancel = CancellationToken::new();
            let (_client, _server, relay) = start_relay(Relay::default(), &cancel);

            cancel.cancel();
            let result = timeout(TEST_TIMEOUT, relay).await.unwrap().unwrap();
            assert!(result.is_ok());
        }

        #[tokio::test(start_paused = true)]
        async fn ceiling_reports_timeout() {
            let cancel = CancellationToken::new();
            let (mut client, mut server, relay) = start_relay(Relay::default(), &cancel);

            client.write_all(b"still here").await.unwrap();
            let mut buf = [0u8; 10];
            server.read_exact(&mut buf).await.unwrap();

            let result = relay.await.unwrap();
            assert!(matches!(result, Err(ProxyError::ProxyTimeout)));

            // The relay dropped its ends of both pipes.
            let mut rest = Vec::new();
            server.read_to_end(&mut rest).await.unwrap();
            assert!(rest.is_empty());
        }

        #[tokio::test]
        async fn configured_ceiling_is_honored() {
            let cancel = CancellationToken::new();
            let relay = Relay::new(Duration::from_millis(50));
            let (_client, _server, handle) = start_relay(relay, &cancel);

            let result = timeout(TEST_TIMEOUT, handle).await.unwrap().unwrap();
            assert!(matches!(result, Err(ProxyError::ProxyTimeout)));
        }
    }
}
