use std::sync::Arc;
use std::time::Duration;

use bulkget_core::Locator;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use url::Url;

use crate::http1::{RawResponse, StoreRequest};
use crate::{FetchError, StoreError};

/// The object-store capabilities the workers rely on.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Base URL every request goes to; pipelined workers dial its host.
    fn endpoint(&self) -> &Url;

    /// One complete request/response exchange for `locator`.
    async fn get_object(&self, locator: &Locator) -> Result<Bytes, FetchError>;

    /// A signed GET for `locator`, ready to be written to a connection.
    fn build_request(&self, locator: &Locator) -> Result<StoreRequest, FetchError>;

    /// Validate a raw response to a request from [`ObjectStore::build_request`].
    fn unmarshal_response(
        &self,
        locator: &Locator,
        response: RawResponse,
    ) -> Result<Bytes, FetchError>;
}

/// Adds credentials to an outgoing request.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: &mut StoreRequest) -> Result<(), StoreError>;
}

/// Anonymous access.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsigned;

impl RequestSigner for Unsigned {
    fn sign(&self, _request: &mut StoreRequest) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Sends a fixed `Authorization` header, for stores fronted by a token proxy.
#[derive(Debug, Clone)]
pub struct StaticAuthorization {
    value: HeaderValue,
}

impl StaticAuthorization {
    pub fn new(value: &str) -> Result<Self, StoreError> {
        let mut value = HeaderValue::from_str(value)
            .map_err(|err| StoreError::Signing(format!("invalid authorization value: {err}")))?;
        value.set_sensitive(true);
        Ok(Self { value })
    }
}

impl RequestSigner for StaticAuthorization {
    fn sign(&self, request: &mut StoreRequest) -> Result<(), StoreError> {
        request.headers.insert(AUTHORIZATION, self.value.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub endpoint: Url,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_object_bytes: u64,
}

impl StoreSettings {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            max_object_bytes: 1024 * 1024 * 1024,
        }
    }

    /// The public regional S3 endpoint.
    pub fn for_region(region: &str) -> Result<Self, FetchError> {
        let endpoint = Url::parse(&format!("https://s3.{region}.amazonaws.com"))
            .map_err(|err| FetchError::Config(format!("invalid region {region:?}: {err}")))?;
        Ok(Self::new(endpoint))
    }
}

/// Path-style HTTP object store: objects live at `{endpoint}/{bucket}/{key}`.
pub struct HttpStore {
    settings: StoreSettings,
    client: reqwest::Client,
    signer: Arc<dyn RequestSigner>,
}

impl HttpStore {
    pub fn new(settings: StoreSettings, signer: Arc<dyn RequestSigner>) -> Result<Self, FetchError> {
        if settings.endpoint.cannot_be_a_base() {
            return Err(FetchError::Config(format!(
                "endpoint {} cannot be a base url",
                settings.endpoint
            )));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| FetchError::Config(format!("http client: {err}")))?;
        Ok(Self {
            settings,
            client,
            signer,
        })
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    fn object_url(&self, locator: &Locator) -> Result<Url, FetchError> {
        let mut url = self.settings.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Config(format!("endpoint {} cannot be a base url", self.settings.endpoint)))?
            .pop_if_empty()
            .push(locator.bucket())
            .extend(locator.key().split('/'));
        Ok(url)
    }

    fn check_size(&self, actual: u64) -> Result<(), FetchError> {
        if actual > self.settings.max_object_bytes {
            return Err(StoreError::TooLarge {
                max_bytes: self.settings.max_object_bytes,
                actual: Some(actual),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ObjectStore for HttpStore {
    fn endpoint(&self) -> &Url {
        &self.settings.endpoint
    }

    async fn get_object(&self, locator: &Locator) -> Result<Bytes, FetchError> {
        let request = self.build_request(locator)?;
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if let Some(content_len) = response.content_length() {
            if status.is_success() {
                self.check_size(content_len)?;
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            self.check_size(body.len() as u64 + chunk.len() as u64)?;
            body.extend_from_slice(&chunk);
        }

        if !status.is_success() {
            return Err(store_error(status, &body, locator).into());
        }
        Ok(Bytes::from(body))
    }

    fn build_request(&self, locator: &Locator) -> Result<StoreRequest, FetchError> {
        let mut request = StoreRequest::get(self.object_url(locator)?);
        self.signer.sign(&mut request)?;
        Ok(request)
    }

    fn unmarshal_response(
        &self,
        locator: &Locator,
        response: RawResponse,
    ) -> Result<Bytes, FetchError> {
        if !response.status.is_success() {
            return Err(store_error(response.status, &response.body, locator).into());
        }
        self.check_size(response.body.len() as u64)?;
        Ok(response.body)
    }
}

/// Classify an unsuccessful store response, using the XML error body when present.
pub(crate) fn store_error(status: StatusCode, body: &[u8], locator: &Locator) -> StoreError {
    let text = String::from_utf8_lossy(body);
    let code = xml_tag(&text, "Code");
    match (status, code.as_deref()) {
        (StatusCode::NOT_FOUND, None | Some("NoSuchKey")) => StoreError::NoSuchKey {
            bucket: locator.bucket().to_string(),
            key: locator.key().to_string(),
        },
        (StatusCode::FORBIDDEN, None | Some("AccessDenied")) => StoreError::AccessDenied {
            bucket: locator.bucket().to_string(),
            key: locator.key().to_string(),
        },
        _ => StoreError::Service {
            status: status.as_u16(),
            code: code.clone().unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("UnknownError")
                    .replace(' ', "")
            }),
            message: xml_tag(&text, "Message").unwrap_or_else(|| status.to_string()),
        },
    }
}

fn xml_tag(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim().to_string())
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Transport(format!("timeout: {err}"));
    }
    FetchError::Transport(err.to_string())
}
