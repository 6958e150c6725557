//! Minimal HTTP/1.1 framing for pipelined GETs: request serialization and
//! response parsing that reads exactly one message per call.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use reqwest::{Method, StatusCode};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use url::Url;

use crate::FetchError;

const MAX_LINE_BYTES: u64 = 16 * 1024;
const MAX_HEADERS: usize = 128;

/// A transport-ready request. Built and signed by the store, written by the pipeline.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl StoreRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// `host[:port]`, with the port omitted when it is the scheme default.
    pub fn authority(&self) -> Result<String, FetchError> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| FetchError::Config(format!("request url {} has no host", self.url)))?;
        Ok(match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }
}

/// A fully read response. The body is owned, so the connection is free to move on.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Serialize a bodyless request in origin form.
pub fn encode_request(request: &StoreRequest) -> Result<Vec<u8>, FetchError> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(request.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.url.path().as_bytes());
    if let Some(query) = request.url.query() {
        out.push(b'?');
        out.extend_from_slice(query.as_bytes());
    }
    out.extend_from_slice(b" HTTP/1.1\r\n");

    if !request.headers.contains_key(HOST) {
        out.extend_from_slice(b"Host: ");
        out.extend_from_slice(request.authority()?.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    for (name, value) in request.headers.iter() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    Ok(out)
}

/// Read exactly one response for a request made with `method`.
///
/// Informational (1xx) responses are skipped. The body is framed by, in order:
/// the no-body rules (HEAD, 204, 304), `Transfer-Encoding`, `Content-Length`,
/// and finally connection close.
pub async fn read_response<R>(
    reader: &mut R,
    method: &Method,
    max_body_bytes: u64,
) -> Result<RawResponse, FetchError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let status_line = match read_line(reader).await? {
            Some(line) => line,
            None => return Err(FetchError::Transport("connection closed by peer".into())),
        };
        let status = parse_status_line(&status_line)?;
        let headers = read_headers(reader).await?;

        if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
            continue;
        }

        let body = read_body(reader, method, status, &headers, max_body_bytes).await?;
        return Ok(RawResponse {
            status,
            headers,
            body,
        });
    }
}

async fn read_body<R>(
    reader: &mut R,
    method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
    max_body_bytes: u64,
) -> Result<Bytes, FetchError>
where
    R: AsyncBufRead + Unpin,
{
    if *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(Bytes::new());
    }

    if let Some(coding) = last_transfer_coding(headers)? {
        if coding.eq_ignore_ascii_case("chunked") {
            return read_chunked(reader, max_body_bytes).await;
        }
        return read_to_close(reader, max_body_bytes).await;
    }

    if let Some(len) = content_length(headers)? {
        if len > max_body_bytes {
            return Err(FetchError::protocol(format!(
                "response body of {len} bytes exceeds limit of {max_body_bytes}"
            )));
        }
        let mut body = vec![0u8; len as usize];
        reader
            .read_exact(&mut body)
            .await
            .map_err(|err| FetchError::transport("reading body", err))?;
        return Ok(Bytes::from(body));
    }

    read_to_close(reader, max_body_bytes).await
}

async fn read_chunked<R>(reader: &mut R, max_body_bytes: u64) -> Result<Bytes, FetchError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let line = require_line(reader).await?;
        let size_field = line.split(';').next().unwrap_or_default().trim();
        let size = u64::from_str_radix(size_field, 16)
            .map_err(|_| FetchError::protocol(format!("invalid chunk size {size_field:?}")))?;

        if size == 0 {
            // Trailer section, terminated by an empty line.
            loop {
                if require_line(reader).await?.is_empty() {
                    return Ok(Bytes::from(body));
                }
            }
        }

        let Some(total) = (body.len() as u64)
            .checked_add(size)
            .filter(|total| *total <= max_body_bytes)
        else {
            return Err(FetchError::protocol(format!(
                "chunked body exceeds limit of {max_body_bytes} bytes"
            )));
        };
        let start = body.len();
        body.resize(total as usize, 0);
        reader
            .read_exact(&mut body[start..])
            .await
            .map_err(|err| FetchError::transport("reading chunk", err))?;

        if !require_line(reader).await?.is_empty() {
            return Err(FetchError::protocol("chunk not terminated by CRLF"));
        }
    }
}

async fn read_to_close<R>(reader: &mut R, max_body_bytes: u64) -> Result<Bytes, FetchError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    reader
        .take(max_body_bytes.saturating_add(1))
        .read_to_end(&mut body)
        .await
        .map_err(|err| FetchError::transport("reading body", err))?;
    if body.len() as u64 > max_body_bytes {
        return Err(FetchError::protocol(format!(
            "response body exceeds limit of {max_body_bytes} bytes"
        )));
    }
    Ok(Bytes::from(body))
}

async fn read_headers<R>(reader: &mut R) -> Result<HeaderMap, FetchError>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = HeaderMap::new();
    loop {
        let line = require_line(reader).await?;
        if line.is_empty() {
            return Ok(headers);
        }
        if headers.len() >= MAX_HEADERS {
            return Err(FetchError::protocol("too many response headers"));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FetchError::protocol(format!("malformed header line {line:?}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| FetchError::protocol(format!("invalid header name {name:?}")))?;
        let value = HeaderValue::from_bytes(value.trim().as_bytes())
            .map_err(|_| FetchError::protocol(format!("invalid value for header {name}")))?;
        headers.append(name, value);
    }
}

fn parse_status_line(line: &str) -> Result<StatusCode, FetchError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(FetchError::protocol(format!("malformed status line {line:?}")));
    }
    let code = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| FetchError::protocol(format!("malformed status line {line:?}")))?;
    StatusCode::from_u16(code)
        .map_err(|_| FetchError::protocol(format!("invalid status code {code}")))
}

fn last_transfer_coding(headers: &HeaderMap) -> Result<Option<String>, FetchError> {
    let mut last = None;
    for value in headers.get_all(TRANSFER_ENCODING) {
        let value = value
            .to_str()
            .map_err(|_| FetchError::protocol("non-ascii transfer-encoding"))?;
        if let Some(coding) = value.split(',').map(str::trim).filter(|c| !c.is_empty()).last() {
            last = Some(coding.to_string());
        }
    }
    Ok(last)
}

fn content_length(headers: &HeaderMap) -> Result<Option<u64>, FetchError> {
    let mut length = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let parsed = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| FetchError::protocol("invalid content-length"))?;
        match length {
            Some(existing) if existing != parsed => {
                return Err(FetchError::protocol("conflicting content-length values"));
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

/// Like [`read_line`], but EOF is an error: we are in the middle of a message.
async fn require_line<R>(reader: &mut R) -> Result<String, FetchError>
where
    R: AsyncBufRead + Unpin,
{
    read_line(reader)
        .await?
        .ok_or_else(|| FetchError::Transport("connection closed mid-response".into()))
}

/// One CRLF (or bare LF) terminated line without its terminator; `None` on clean EOF.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, FetchError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|err| FetchError::transport("reading response", err))?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if n as u64 >= MAX_LINE_BYTES {
            return Err(FetchError::protocol("response line too long"));
        }
        return Err(FetchError::Transport("connection closed mid-line".into()));
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| FetchError::protocol("response line is not valid utf-8"))
}
