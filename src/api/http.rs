use std::collections::HashMap;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::types::error::MailsortError;

const MAX_HEADER_LINES: usize = 100;
const MAX_HEADER_LINE_BYTES: u64 = 8 * 1024;
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn query_u32(&self, key: &str) -> Option<u32> {
        self.query.get(key).and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, body },
            Err(e) => Self::error(500, &MailsortError::from(e)),
        }
    }

    pub fn error(status: u16, err: &MailsortError) -> Self {
        let body = serde_json::to_string(err)
            .unwrap_or_else(|_| r#"{"type":"Other","message":"internal error"}"#.to_string());
        Self { status, body }
    }

    pub fn not_found() -> Self {
        Self::error(404, &MailsortError::InvalidInput("No such endpoint".into()))
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            202 => "Accepted",
            400 => "Bad Request",
            404 => "Not Found",
            409 => "Conflict",
            413 => "Payload Too Large",
            _ => "Internal Server Error",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason(),
            self.body.len()
        )
        .into_bytes();
        out.extend_from_slice(self.body.as_bytes());
        out
    }
}

/// Percent-decodes one path segment. '+' is kept literally.
pub fn decode_segment(segment: &str) -> String {
    let escaped = segment.replace('+', "%2B");
    url::form_urlencoded::parse(format!("v={}", escaped).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// Reads one request. `Ok(None)` means the peer closed before sending anything.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, MailsortError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if (&mut *reader).take(MAX_HEADER_LINE_BYTES).read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next()) {
        (Some(method), Some(target)) => (method.to_ascii_uppercase(), target.to_string()),
        _ => return Err(MailsortError::Parse(format!("Bad request line: {}", line.trim()))),
    };

    let mut content_length = 0usize;
    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        if (&mut *reader).take(MAX_HEADER_LINE_BYTES).read_line(&mut line).await? == 0 {
            break;
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| MailsortError::Parse("Bad Content-Length".into()))?;
            }
        }
    }
    if content_length > MAX_BODY_BYTES {
        return Err(MailsortError::InvalidInput("Request body too large".into()));
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (target, String::new()),
    };
    let query = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    Ok(Some(Request {
        method,
        path,
        query,
        body,
    }))
}
