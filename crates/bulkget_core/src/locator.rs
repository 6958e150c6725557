use std::fmt;

use url::Url;

/// A bucket/key pair parsed from a locator URL such as `s3://bucket/path/to/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    bucket: String,
    key: String,
    url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
    #[error("parse({input:?}): {message}")]
    InvalidUrl { input: String, message: String },
    #[error("locator {0:?} has no bucket")]
    MissingBucket(String),
    #[error("locator {0:?} has no key")]
    MissingKey(String),
    #[error("locator {0:?} key is not valid UTF-8 once decoded")]
    InvalidKey(String),
    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<LocatorError>,
    },
}

impl Locator {
    /// Build a locator from an unescaped bucket and key. Each `/`-separated key
    /// segment is percent-encoded, so `?`, `#` and `%` survive in the key.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Result<Self, LocatorError> {
        let bucket = bucket.into();
        let key = key.into();
        let base = format!("s3://{bucket}");
        let mut url = Url::parse(&base).map_err(|err| LocatorError::InvalidUrl {
            input: base.clone(),
            message: err.to_string(),
        })?;
        match url.host_str() {
            Some(host) if !host.is_empty() && host == bucket => {}
            Some(host) if !host.is_empty() => {
                return Err(LocatorError::InvalidUrl {
                    input: base,
                    message: format!("bucket {bucket:?} is not a plain host name"),
                })
            }
            _ => return Err(LocatorError::MissingBucket(base)),
        }
        if key.is_empty() {
            return Err(LocatorError::MissingKey(base));
        }
        url.path_segments_mut()
            .map_err(|_| LocatorError::MissingBucket(base.clone()))?
            .clear()
            .extend(key.split('/'));
        Ok(Locator { bucket, key, url })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key without the leading `/`, percent-decoded.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Parse one locator. The URL host is the bucket and the path (minus its leading
/// slash) is the key; the scheme is not interpreted.
pub fn parse_locator(input: &str) -> Result<Locator, LocatorError> {
    let url = Url::parse(input).map_err(|err| LocatorError::InvalidUrl {
        input: input.to_string(),
        message: err.to_string(),
    })?;

    let bucket = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => return Err(LocatorError::MissingBucket(input.to_string())),
    };

    let raw_key = url.path().trim_start_matches('/');
    if raw_key.is_empty() {
        return Err(LocatorError::MissingKey(input.to_string()));
    }
    let key = urlencoding::decode(raw_key)
        .map_err(|_| LocatorError::InvalidKey(input.to_string()))?
        .into_owned();

    Ok(Locator { bucket, key, url })
}

/// Parse a line-oriented locator list. Surrounding whitespace is trimmed and
/// blank lines are skipped; the first malformed line fails the whole list.
pub fn parse_locator_list(text: &str) -> Result<Vec<Locator>, LocatorError> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(|(line, input)| {
            parse_locator(input).map_err(|source| LocatorError::Line {
                line,
                source: Box::new(source),
            })
        })
        .collect()
}
