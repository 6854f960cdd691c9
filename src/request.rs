//! Bounded HTTP/1.x request-head reader.
//!
//! Only the request line and headers are parsed. Whatever the client sent
//! past the head (a body prefix, or the first TLS record on a CONNECT) is
//! kept in [`Request::buffered`] so it can be handed to the backend untouched.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ProxyError;

/// Maximum number of bytes read while waiting for a complete request head.
pub const REQ_READ_LIMIT: usize = 64 * 1024;

/// Header slots tried first; grown on demand up to [`MAX_HEADERS`].
const INITIAL_HEADERS: usize = 64;
/// A header line is at least 4 bytes (`a:\r\n`), so this many always fit the read limit.
const MAX_HEADERS: usize = REQ_READ_LIMIT / 4;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    /// Request target exactly as sent: origin, absolute or authority form.
    pub target: String,
    /// Origin host, with a port when one was given.
    pub host: String,
    pub headers: Vec<Header>,
    /// Bytes received after the end of the head.
    pub buffered: Vec<u8>,
}

impl Request {
    #[must_use]
    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Raw value of the first header with this name, compared case-insensitively.
    #[must_use]
    pub fn header_bytes(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }

    /// Like [`Request::header_bytes`], but `None` for values that are not UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_bytes(name)
            .and_then(|value| std::str::from_utf8(value).ok())
    }

    /// Removes every occurrence of the named header. Returns whether any was present.
    pub fn remove_header(&mut self, name: &str) -> bool {
        let before = self.headers.len();
        self.headers.retain(|h| !h.name.eq_ignore_ascii_case(name));
        self.headers.len() != before
    }

    /// Target in origin form, as sent to the origin server.
    #[must_use]
    pub fn request_uri(&self) -> String {
        match split_absolute_form(&self.target) {
            Some((_, rest)) => {
                let rest = rest.split('#').next().unwrap_or_default();
                if rest.starts_with('/') {
                    rest.to_string()
                } else {
                    format!("/{rest}")
                }
            }
            None => self.target.clone(),
        }
    }

    /// Serializes the head for forwarding. `Host` is always written first and
    /// taken from [`Request::host`]; any `Host` headers the client sent are dropped.
    #[must_use]
    pub fn encode_head(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.request_uri().as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\nHost: ");
        out.extend_from_slice(self.host.as_bytes());
        out.extend_from_slice(b"\r\n");
        for header in self
            .headers
            .iter()
            .filter(|h| !h.name.eq_ignore_ascii_case("host"))
        {
            out.extend_from_slice(header.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(&header.value);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Reads one request head from `reader`, never buffering more than
/// [`REQ_READ_LIMIT`] bytes.
pub async fn read_request<R>(reader: &mut R) -> Result<Request, ProxyError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);

    loop {
        if buf.len() >= REQ_READ_LIMIT {
            return Err(ProxyError::RequestTooLarge {
                limit: REQ_READ_LIMIT,
            });
        }

        let start = buf.len();
        let room = (REQ_READ_LIMIT - start).min(READ_CHUNK);
        buf.resize(start + room, 0);
        let n = reader
            .read(&mut buf[start..])
            .await
            .map_err(ProxyError::RequestRead)?;
        buf.truncate(start + n);

        if n == 0 {
            return Err(ProxyError::MalformedRequest(
                "unexpected EOF before end of headers".to_string(),
            ));
        }

        if let Some(request) = parse_head(&buf)? {
            return Ok(request);
        }
    }
}

fn parse_head(buf: &[u8]) -> Result<Option<Request>, ProxyError> {
    let mut slots = INITIAL_HEADERS;
    loop {
        let mut headers = vec![httparse::EMPTY_HEADER; slots];
        let mut parsed = httparse::Request::new(&mut headers);

        let head_len = match parsed.parse(buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(httparse::Error::TooManyHeaders) if slots < MAX_HEADERS => {
                slots = (slots * 4).min(MAX_HEADERS);
                continue;
            }
            Err(e) => return Err(ProxyError::MalformedRequest(e.to_string())),
        };

        return build_request(&parsed, &buf[head_len..]).map(Some);
    }
}

fn build_request(parsed: &httparse::Request<'_, '_>, rest: &[u8]) -> Result<Request, ProxyError> {
    let method = parsed
        .method
        .ok_or_else(|| ProxyError::MalformedRequest("missing method".to_string()))?
        .to_string();
    let target = parsed
        .path
        .ok_or_else(|| ProxyError::MalformedRequest("missing request target".to_string()))?
        .to_string();
    let headers: Vec<Header> = parsed
        .headers
        .iter()
        .map(|h| Header {
            name: h.name.to_string(),
            value: h.value.to_vec(),
        })
        .collect();

    let host = resolve_host(&method, &target, &headers)
        .ok_or_else(|| ProxyError::MalformedRequest("missing host".to_string()))?;

    Ok(Request {
        method,
        target,
        host,
        headers,
        buffered: rest.to_vec(),
    })
}

fn resolve_host(method: &str, target: &str, headers: &[Header]) -> Option<String> {
    let host = if method.eq_ignore_ascii_case("CONNECT") {
        target.to_string()
    } else if let Some((authority, _)) = split_absolute_form(target) {
        authority
            .rsplit_once('@')
            .map_or(authority, |(_, host)| host)
            .to_string()
    } else {
        let value = headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("host"))
            .map(|h| h.value.as_slice())?;
        std::str::from_utf8(value).ok()?.trim().to_string()
    };

    (!host.is_empty()).then_some(host)
}

/// Splits `scheme://authority/rest` into authority and rest.
fn split_absolute_form(target: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = target.split_once("://")?;
    let valid_scheme = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid_scheme {
        return None;
    }
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    Some((&rest[..end], &rest[end..]))
}
