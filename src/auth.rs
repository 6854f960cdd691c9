use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::error::ProxyError;
use crate::request::Request;

pub const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";

/// Decides whether a request may go through the proxy.
///
/// On success the returned request must no longer carry any proxy
/// credentials, since it may be forwarded to the origin as is.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: Request) -> Result<Request, ProxyError>;
}

/// Lets every request through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    async fn authenticate(&self, request: Request) -> Result<Request, ProxyError> {
        Ok(request)
    }
}

/// RFC 7617 Basic credentials checked against the `Proxy-Authorization` header.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl Authenticator for BasicAuth {
    async fn authenticate(&self, mut request: Request) -> Result<Request, ProxyError> {
        let value = request
            .header_bytes(PROXY_AUTHORIZATION)
            .filter(|v| !v.is_empty())
            .ok_or(ProxyError::NoAuth)?;

        let (username, password) = std::str::from_utf8(value)
            .ok()
            .and_then(parse_basic_auth)
            .ok_or(ProxyError::MalformedCredentials)?;

        if username != self.username || password != self.password {
            return Err(ProxyError::InvalidAuth);
        }

        request.remove_header(PROXY_AUTHORIZATION);
        Ok(request)
    }
}

/// Parses a Basic credential string.
///
/// `"Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="` gives `("Aladdin", "open sesame")`.
/// The scheme is matched case-insensitively and the password is everything
/// after the first colon.
#[must_use]
pub fn parse_basic_auth(value: &str) -> Option<(String, String)> {
    const PREFIX: &str = "Basic ";

    let scheme = value.get(..PREFIX.len())?;
    if !scheme.eq_ignore_ascii_case(PREFIX) {
        return None;
    }

    let decoded = STANDARD.decode(&value[PREFIX.len()..]).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
