//! HTTP fetching, kept behind a trait so the crawl loop can be driven by
//! a mock in tests instead of hitting the network.

use thiserror::Error;

/// Errors raised while fetching a single URL.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request itself failed (DNS, connect, TLS, timeout, ...).
    #[error("request to {url} failed: {source}")]
    Request {
        /// The URL that was being fetched.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The server responded with a non-success status code.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// The URL that was being fetched.
        url: String,
        /// The HTTP status code returned.
        status: u16,
    },
}

/// A fetched resource: the bytes of its body plus enough metadata to
/// decide whether it is worth scanning for links.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    /// The final URL after redirects.
    pub final_url: String,
    /// The response body, unparsed.
    pub bytes: Vec<u8>,
    /// The `Content-Type` response header, if present.
    pub content_type: Option<String>,
}

impl FetchedBody {
    /// Whether this body's content type looks like HTML worth scanning
    /// for outgoing links.
    pub fn looks_like_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml+xml"))
            .unwrap_or(false)
    }
}

/// Fetches a single URL, returning its body.
pub trait HttpFetcher: Send + Sync {
    /// Fetch `url`, following redirects, and return its final body.
    fn fetch(&self, url: &str) -> Result<FetchedBody, HttpError>;
}

/// [`HttpFetcher`] backed by a blocking [`reqwest::blocking::Client`].
/// Blocking, rather than async, on purpose: this crawler is a single
/// cooperative loop that already treats one in-flight request at a time
/// as the unit of concurrency, so there is nothing for an async runtime
/// to buy here.
pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestFetcher {
    /// A fetcher with a 60 second request timeout and a descriptive
    /// user agent.
    pub fn new() -> Self {
        Self::with_user_agent(concat!("datawatch/", env!("CARGO_PKG_VERSION")))
    }

    /// A fetcher that sends `user_agent` on every request.
    pub fn with_user_agent(user_agent: impl AsRef<str>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .user_agent(user_agent.as_ref().to_string())
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self { client }
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedBody, HttpError> {
        let response = self.client.get(url).send().map_err(|source| HttpError::Request {
            url: url.to_string(),
            source,
        })?;
        let final_url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .map_err(|source| HttpError::Request {
                url: url.to_string(),
                source,
            })?
            .to_vec();
        Ok(FetchedBody {
            final_url,
            bytes,
            content_type,
        })
    }
}

#[cfg(test)]
pub(crate) struct MockFetcher {
    pub(crate) responses: std::collections::HashMap<String, Result<FetchedBody, String>>,
}

#[cfg(test)]
impl HttpFetcher for MockFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedBody, HttpError> {
        match self.responses.get(url) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(_)) => Err(HttpError::Status {
                url: url.to_string(),
                status: 500,
            }),
            None => Err(HttpError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
