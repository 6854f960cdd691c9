//! HTTP Forward Proxy
//!
//! A forward proxy speaking HTTP/1.x to its clients. `CONNECT` requests become
//! opaque TCP tunnels; any other request is forwarded to the origin with its
//! proxy credentials stripped. Clients may be required to present Basic
//! credentials in `Proxy-Authorization`.

pub mod auth;
pub mod config;
pub mod dialer;
pub mod error;
pub mod proxy;
pub mod relay;
pub mod request;
pub mod server;

#[cfg(test)]
mod test_support;

// Re-export commonly used types and functions
pub use auth::{Authenticator, BasicAuth, NoAuth, parse_basic_auth};
pub use config::{AuthConfig, Config, ListenConfig, RelayConfig, load_config};
pub use dialer::{Dialer, DirectTcp};
pub use error::ProxyError;
pub use proxy::ConnectionHandler;
pub use relay::{CONN_MAX_DURATION, Relay};
pub use request::{REQ_READ_LIMIT, Request, read_request};
pub use server::{Server, listen_and_serve};
