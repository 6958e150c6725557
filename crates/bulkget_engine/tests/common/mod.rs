#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use bulkget_core::{parse_locator, Locator};
use bulkget_engine::{
    BoxTransport, Connector, FetchError, ObjectStore, RawResponse, StoreError, StoreRequest,
};
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use url::Url;

pub const BUCKET: &str = "bucket";

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(bulkget_logging::initialize_for_tests);
}

pub fn locators(count: usize) -> Vec<Locator> {
    (0..count)
        .map(|i| parse_locator(&format!("s3://{BUCKET}/obj/{i}")).unwrap())
        .collect()
}

/// Deterministic, distinct payload per index, with varying lengths.
pub fn payload(index: usize) -> Vec<u8> {
    format!("payload-{index}-{}", "x".repeat(index % 17)).into_bytes()
}

pub fn objects(count: usize) -> HashMap<String, Vec<u8>> {
    (0..count)
        .map(|i| (format!("/{BUCKET}/obj/{i}"), payload(i)))
        .collect()
}

/// In-memory object store. Naive gets answer from the map after an
/// index-dependent delay; pipelined requests address `http://memory.test`.
pub struct MemoryStore {
    endpoint: Url,
    objects: HashMap<String, Vec<u8>>,
    jitter: bool,
}

impl MemoryStore {
    pub fn new(objects: HashMap<String, Vec<u8>>) -> Self {
        Self {
            endpoint: Url::parse("http://memory.test").unwrap(),
            objects,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn without(mut self, path: &str) -> Self {
        self.objects.remove(path);
        self
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn get_object(&self, locator: &Locator) -> Result<Bytes, FetchError> {
        let path = format!("/{}/{}", locator.bucket(), locator.key());
        if self.jitter {
            let n: usize = path.bytes().map(usize::from).sum();
            tokio::time::sleep(Duration::from_millis((n % 7) as u64)).await;
        }
        match self.objects.get(&path) {
            Some(body) => Ok(Bytes::from(body.clone())),
            None => Err(StoreError::NoSuchKey {
                bucket: locator.bucket().to_string(),
                key: locator.key().to_string(),
            }
            .into()),
        }
    }

    fn build_request(&self, locator: &Locator) -> Result<StoreRequest, FetchError> {
        let url = self
            .endpoint
            .join(&format!("/{}/{}", locator.bucket(), locator.key()))
            .unwrap();
        Ok(StoreRequest::get(url))
    }

    fn unmarshal_response(
        &self,
        locator: &Locator,
        response: RawResponse,
    ) -> Result<Bytes, FetchError> {
        if response.status.as_u16() == 404 {
            return Err(StoreError::NoSuchKey {
                bucket: locator.bucket().to_string(),
                key: locator.key().to_string(),
            }
            .into());
        }
        Ok(response.body)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerBehaviour {
    /// Sleep a few index-dependent milliseconds before each response.
    pub jitter: bool,
    /// Alternate between content-length and chunked framing.
    pub mix_framing: bool,
    /// Answer this many requests, then drop the connection.
    pub fail_after: Option<usize>,
}

/// Serve pipelined GETs on `stream` from `objects`, strictly in request order.
pub async fn serve(stream: DuplexStream, objects: Arc<HashMap<String, Vec<u8>>>, behaviour: ServerBehaviour) {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut served = 0usize;
    loop {
        if behaviour.fail_after == Some(served) {
            return;
        }
        let Some(path) = read_request_path(&mut reader).await else {
            return;
        };
        if behaviour.jitter {
            tokio::time::sleep(Duration::from_millis(((served * 7) % 5) as u64)).await;
        }
        let response = match objects.get(&path) {
            Some(body) if behaviour.mix_framing && served % 2 == 1 => chunked_response(body),
            Some(body) => {
                let mut out = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len())
                    .into_bytes();
                out.extend_from_slice(body);
                out
            }
            None => {
                let body = "<Error><Code>NoSuchKey</Code></Error>";
                format!(
                    "HTTP/1.1 404 Not Found\r\nContent-Type: application/xml\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                )
                .into_bytes()
            }
        };
        if write_half.write_all(&response).await.is_err() {
            return;
        }
        served += 1;
    }
}

fn chunked_response(body: &[u8]) -> Vec<u8> {
    let mut out = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    for chunk in body.chunks(4) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

/// Read one request head and return its path; `None` at EOF.
pub async fn read_request_path<R>(reader: &mut R) -> Option<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let path = line.split_whitespace().nth(1)?.to_string();
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await.ok()? == 0 {
            return None;
        }
        if header.trim().is_empty() {
            return Some(path);
        }
    }
}

/// Dials an in-memory duplex pipe with a scripted server on the far end.
pub struct DuplexConnector {
    objects: Arc<HashMap<String, Vec<u8>>>,
    behaviour: ServerBehaviour,
    pub connections: AtomicUsize,
}

impl DuplexConnector {
    pub fn new(objects: HashMap<String, Vec<u8>>, behaviour: ServerBehaviour) -> Self {
        Self {
            objects: Arc::new(objects),
            behaviour,
            connections: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self) -> Result<BoxTransport, FetchError> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve(server, Arc::clone(&self.objects), self.behaviour));
        Ok(Box::new(client))
    }
}

/// A connector whose every dial fails.
pub struct RefusingConnector;

#[async_trait::async_trait]
impl Connector for RefusingConnector {
    async fn connect(&self) -> Result<BoxTransport, FetchError> {
        Err(FetchError::Transport("connect: connection refused".into()))
    }
}
