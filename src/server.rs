use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{net::TcpListener, sync::Semaphore};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::dialer::Dialer;
use crate::error::ProxyError;
use crate::proxy::ConnectionHandler;
use crate::relay::Relay;

/// How long in-flight connections get to wind down after shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Accept loop spawning one [`ConnectionHandler`] task per client.
pub struct Server {
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    connection_limit: Option<Arc<Semaphore>>,
    shutdown_grace: Duration,
}

impl Server {
    pub async fn bind(addr: &str, handler: ConnectionHandler) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self {
            listener,
            handler: Arc::new(handler),
            connection_limit: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    /// Caps the number of connections handled at once. Further clients wait
    /// in the listen backlog until a slot frees up.
    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.connection_limit = Some(Arc::new(Semaphore::new(max_connections)));
        self
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `cancel` fires or accepting fails.
    ///
    /// Connection errors never stop the loop. On shutdown the listener is
    /// closed first, then the handlers see the same cancellation and get up
    /// to the grace period to finish.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), ProxyError> {
        let tracker = TaskTracker::new();

        if let Ok(addr) = self.local_addr() {
            info!(listen_addr = %addr, "Proxy listening");
        }

        let result = loop {
            let permit = match &self.connection_limit {
                Some(limit) => {
                    let acquired = tokio::select! {
                        () = cancel.cancelled() => break Ok(()),
                        acquired = Arc::clone(limit).acquire_owned() => acquired,
                    };
                    match acquired {
                        Ok(permit) => Some(permit),
                        Err(_) => break Ok(()),
                    }
                }
                None => None,
            };

            let (stream, client_addr) = tokio::select! {
                () = cancel.cancelled() => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => break Err(ProxyError::Accept(e)),
                },
            };

            debug!(client_addr = %client_addr, "Accepted connection");

            let handler = Arc::clone(&self.handler);
            let cancel = cancel.clone();
            tracker.spawn(async move {
                let _permit = permit;
                if let Err(e) = handler.handle(&cancel, stream, client_addr).await {
                    if e.is_expected() {
                        debug!(client_addr = %client_addr, error = %e, "Connection ended");
                    } else {
                        error!(client_addr = %client_addr, error = %e, "Connection failed");
                    }
                }
            });
        };

        tracker.close();
        // New clients are refused while the remaining handlers drain.
        drop(self.listener);

        if cancel.is_cancelled() {
            if tokio::time::timeout(self.shutdown_grace, tracker.wait())
                .await
                .is_err()
            {
                warn!(
                    remaining = tracker.len(),
                    "Shutdown grace period elapsed with connections still open"
                );
            }
            info!("Proxy stopped");
        }

        result
    }
}

/// Binds `addr` and serves until `cancel` fires, with the default relay
/// ceiling and no connection limit.
pub async fn listen_and_serve(
    cancel: CancellationToken,
    auth: Arc<dyn Authenticator>,
    dialer: Arc<dyn Dialer>,
    addr: &str,
) -> Result<(), ProxyError> {
    let handler = ConnectionHandler::new(auth, dialer, Relay::default());
    Server::bind(addr, handler).await?.serve(cancel).await
}
