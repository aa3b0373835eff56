//! `reqwest`-backed [`Fetcher`].
//!
//! One GET per call, no retries: a failed source is simply retried on the
//! next scheduled refresh.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

use protocache_core::error::FetchError;
use protocache_core::fetch::Fetcher;

/// Longest error body kept in [`FetchError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub timeout: Duration,
    /// Extra headers sent with every request, e.g. an auth token.
    pub headers: Vec<(String, String)>,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            headers: Vec::new(),
        }
    }
}

/// Downloads descriptor payloads over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::Client(format!("header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetchError::Client(format!("header '{name}' value: {e}")))?;
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(concat!("protocache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            http,
            timeout: config.timeout,
        })
    }

    /// Fetcher with a 10 s timeout and no extra headers.
    pub fn with_defaults() -> Result<Self, FetchError> {
        Self::new(HttpFetcherConfig::default())
    }

    fn classify(&self, url: &str, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                ms: self.timeout.as_millis() as u64,
            }
        } else if err.is_builder() {
            FetchError::InvalidUrl {
                url: url.to_string(),
                reason: err.to_string(),
            }
        } else {
            FetchError::Request {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = read_error_body(resp).await;
            tracing::debug!(url, status = status.as_u16(), "descriptor download rejected");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await.map_err(|e| {
            if e.is_timeout() {
                self.classify(url, e)
            } else {
                FetchError::Body {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        tracing::debug!(url, bytes = body.len(), "descriptor downloaded");
        Ok(body)
    }
}

/// Reads at most one byte past [`MAX_ERROR_BODY`] of an error response, so
/// an oversized or endless body is never buffered whole. Read errors end the
/// body early.
async fn read_error_body(mut resp: reqwest::Response) -> String {
    let mut buf = Vec::new();
    while buf.len() <= MAX_ERROR_BODY {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                let room = MAX_ERROR_BODY + 1 - buf.len();
                buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    truncate(String::from_utf8_lossy(&buf).into_owned(), MAX_ERROR_BODY)
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
        s.push('…');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;

    async fn serve() -> SocketAddr {
        let app = Router::new()
            .route("/ok", get(|| async { vec![1u8, 2, 3] }))
            .route(
                "/missing",
                get(|| async { (StatusCode::NOT_FOUND, "no such schema") }),
            )
            .route(
                "/huge-error",
                get(|| async { (StatusCode::BAD_GATEWAY, "x".repeat(4096)) }),
            )
            .route(
                "/endless-error",
                get(|| async {
                    let chunks = futures::stream::repeat_with(|| {
                        Ok::<_, std::io::Error>(Bytes::from(vec![b'y'; 1024]))
                    });
                    (StatusCode::SERVICE_UNAVAILABLE, Body::from_stream(chunks))
                }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    "late"
                }),
            )
            .route(
                "/whoami",
                get(|headers: AxumHeaders| async move {
                    headers
                        .get("x-token")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("anonymous")
                        .to_string()
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn fetches_body_bytes() {
        let addr = serve().await;
        let fetcher = HttpFetcher::with_defaults().unwrap();
        let body = fetcher.fetch(&format!("http://{addr}/ok")).await.unwrap();
        assert_eq!(&body[..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let addr = serve().await;
        let fetcher = HttpFetcher::with_defaults().unwrap();
        let err = fetcher
            .fetch(&format!("http://{addr}/missing"))
            .await
            .unwrap_err();
        match err {
            FetchError::Status { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such schema");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_body_is_truncated() {
        let addr = serve().await;
        let fetcher = HttpFetcher::with_defaults().unwrap();
        let err = fetcher
            .fetch(&format!("http://{addr}/huge-error"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        match err {
            FetchError::Status { body, .. } => assert!(body.len() <= MAX_ERROR_BODY + '…'.len_utf8()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn endless_error_body_is_cut_short() {
        let addr = serve().await;
        let fetcher = HttpFetcher::new(HttpFetcherConfig {
            timeout: Duration::from_secs(2),
            headers: Vec::new(),
        })
        .unwrap();
        let err = fetcher
            .fetch(&format!("http://{addr}/endless-error"))
            .await
            .unwrap_err();
        match err {
            FetchError::Status { status, body, .. } => {
                assert_eq!(status, 503);
                assert!(body.starts_with("yyyy"), "{body:?}");
                assert!(body.ends_with('…'));
                assert_eq!(body.len(), MAX_ERROR_BODY + '…'.len_utf8());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let addr = serve().await;
        let fetcher = HttpFetcher::new(HttpFetcherConfig {
            timeout: Duration::from_millis(50),
            headers: Vec::new(),
        })
        .unwrap();
        let err = fetcher
            .fetch(&format!("http://{addr}/slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { ms: 50, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn configured_headers_are_sent() {
        let addr = serve().await;
        let fetcher = HttpFetcher::new(HttpFetcherConfig {
            timeout: Duration::from_secs(5),
            headers: vec![("X-Token".into(), "secret".into())],
        })
        .unwrap();
        let body = fetcher.fetch(&format!("http://{addr}/whoami")).await.unwrap();
        assert_eq!(&body[..], b"secret");
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let err = HttpFetcher::new(HttpFetcherConfig {
            timeout: Duration::from_secs(1),
            headers: vec![("bad header".into(), "v".into())],
        })
        .unwrap_err();
        assert!(matches!(err, FetchError::Client(_)));
    }

    #[tokio::test]
    async fn connection_refused_is_a_request_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let fetcher = HttpFetcher::with_defaults().unwrap();
        let err = fetcher.fetch(&format!("http://{addr}/")).await.unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }), "{err:?}");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(10);
        let t = truncate(s, 5);
        assert!(t.ends_with('…'));
        assert_eq!(t.chars().filter(|c| *c == 'é').count(), 2);
    }
}
