//! reqwest-backed fetchers
//!
//! `HttpFetcher` is the primary page and sitemap fetch path. `StreamingFetcher`
//! reads the body chunk by chunk under a byte cap and a longer timeout; the sitemap
//! worker falls back to it when a large sitemap times out on the primary path.

use super::{classify_response, FetchError, FetchOutcome, FetchRequest, Fetcher};
use crate::config::FetchConfig;
use crate::messages::Cookie;
use async_trait::async_trait;
use reqwest::{header, redirect::Policy, Client, Response};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Maximum redirect hops followed before giving up
const MAX_REDIRECTS: usize = 10;

/// The streaming fallback gets this many request timeouts
const STREAMING_TIMEOUT_FACTOR: u32 = 4;

/// Builds an HTTP client from the fetch configuration
///
/// # Arguments
///
/// * `config` - The fetch configuration
/// * `timeout` - Whole-request timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(FetchError::Client)` - reqwest rejected the configuration
pub fn build_http_client(config: &FetchConfig, timeout: Duration) -> Result<Client, FetchError> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
        .map_err(|e| FetchError::Client(e.to_string()))
}

/// Formats cookies as a `Cookie` request header value
fn cookie_header(cookies: &[Cookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Collects the cookies a response sets
fn response_cookies(response: &Response) -> Vec<Cookie> {
    response
        .cookies()
        .map(|c| Cookie {
            name: c.name().to_string(),
            value: c.value().to_string(),
            domain: c.domain().map(str::to_string),
            path: c.path().map(str::to_string),
        })
        .collect()
}

/// Sends the request, honouring cancellation while waiting for headers
async fn send(
    client: &Client,
    cancel: &CancellationToken,
    request: &FetchRequest,
) -> Result<Response, FetchError> {
    let mut builder = client.get(&request.url);
    if let Some(value) = cookie_header(&request.cookies) {
        builder = builder.header(header::COOKIE, value);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = builder.send() => result.map_err(|e| FetchError::from_reqwest(&request.url, e)),
    }
}

fn outcome(response_meta: ResponseMeta, html: String) -> FetchOutcome {
    let class = classify_response(response_meta.status, &html);
    FetchOutcome {
        html,
        final_url: response_meta.final_url,
        status: response_meta.status,
        blocked: class.blocked,
        is_captcha: class.is_captcha,
        block_reason: class.reason,
        cookies: response_meta.cookies,
    }
}

/// Response metadata captured before the body consumes the response
struct ResponseMeta {
    final_url: String,
    status: u16,
    cookies: Vec<Cookie>,
}

impl ResponseMeta {
    fn of(response: &Response) -> Self {
        Self {
            final_url: response.url().to_string(),
            status: response.status().as_u16(),
            cookies: response_cookies(response),
        }
    }
}

/// Primary fetch path
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = build_http_client(config, Duration::from_secs(config.request_timeout_secs))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        request: &FetchRequest,
    ) -> Result<FetchOutcome, FetchError> {
        let response = send(&self.client, cancel, request).await?;
        let meta = ResponseMeta::of(&response);

        let html = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            body = response.text() => body.map_err(|e| FetchError::from_reqwest(&request.url, e))?,
        };

        Ok(outcome(meta, html))
    }
}

/// Lightweight streaming fallback for large payloads
#[derive(Clone)]
pub struct StreamingFetcher {
    client: Client,
    max_bytes: u64,
}

impl StreamingFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(config.request_timeout_secs) * STREAMING_TIMEOUT_FACTOR;
        let client = build_http_client(config, timeout)?;
        Ok(Self {
            client,
            max_bytes: config.max_sitemap_bytes,
        })
    }
}

#[async_trait]
impl Fetcher for StreamingFetcher {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        request: &FetchRequest,
    ) -> Result<FetchOutcome, FetchError> {
        let mut response = send(&self.client, cancel, request).await?;
        let meta = ResponseMeta::of(&response);

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(FetchError::TooLarge(self.max_bytes));
            }
        }

        let mut body: Vec<u8> = Vec::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                chunk = response.chunk() => chunk.map_err(|e| FetchError::from_reqwest(&request.url, e))?,
            };
            let Some(chunk) = chunk else { break };
            if body.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(FetchError::TooLarge(self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        let html = String::from_utf8_lossy(&body).into_owned();
        Ok(outcome(meta, html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> FetchConfig {
        FetchConfig {
            request_timeout_secs: 5,
            connect_timeout_secs: 2,
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_html_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movie"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><title>Movie</title></html>")
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config()).unwrap();
        let request = FetchRequest::new(format!("{}/movie", server.uri()), &[]);
        let outcome = fetcher
            .fetch(&CancellationToken::new(), &request)
            .await
            .unwrap();

        assert_eq!(outcome.status, 200);
        assert!(outcome.html.contains("<title>Movie</title>"));
        assert!(outcome.final_url.ends_with("/movie"));
        assert!(!outcome.blocked);
        assert!(!outcome.is_captcha);
    }

    #[tokio::test]
    async fn test_forbidden_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config()).unwrap();
        let request = FetchRequest::new(format!("{}/", server.uri()), &[]);
        let outcome = fetcher
            .fetch(&CancellationToken::new(), &request)
            .await
            .unwrap();

        assert!(outcome.blocked);
        assert_eq!(outcome.block_reason.as_deref(), Some("http 403"));
    }

    #[tokio::test]
    async fn test_challenge_page_is_captcha() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(503)
                    .set_body_string("<html><title>Just a moment...</title><div id=\"cf-challenge\"></div></html>"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config()).unwrap();
        let request = FetchRequest::new(format!("{}/", server.uri()), &[]);
        let outcome = fetcher
            .fetch(&CancellationToken::new(), &request)
            .await
            .unwrap();

        assert!(outcome.is_captcha);
        assert!(!outcome.blocked);
    }

    #[tokio::test]
    async fn test_sends_site_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header_matcher("cookie", "cf_clearance=abc; session=1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config()).unwrap();
        let cookies = vec![Cookie::new("cf_clearance", "abc"), Cookie::new("session", "1")];
        let request = FetchRequest::new(format!("{}/", server.uri()), &cookies);
        let outcome = fetcher
            .fetch(&CancellationToken::new(), &request)
            .await
            .unwrap();

        assert_eq!(outcome.status, 200);
    }

    #[tokio::test]
    async fn test_collects_response_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("ok")
                    .insert_header("set-cookie", "cf_clearance=xyz; Path=/"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config()).unwrap();
        let request = FetchRequest::new(format!("{}/", server.uri()), &[]);
        let outcome = fetcher
            .fetch(&CancellationToken::new(), &request)
            .await
            .unwrap();

        assert_eq!(outcome.cookies.len(), 1);
        assert_eq!(outcome.cookies[0].name, "cf_clearance");
        assert_eq!(outcome.cookies[0].value, "xyz");
        assert_eq!(outcome.cookies[0].path.as_deref(), Some("/"));
    }

    #[tokio::test]
    async fn test_cancelled_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = FetchRequest::new(format!("{}/", server.uri()), &[]);
        let result = fetcher.fetch(&cancel, &request).await;

        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&FetchConfig {
            request_timeout_secs: 1,
            ..config()
        })
        .unwrap();
        let request = FetchRequest::new(format!("{}/", server.uri()), &[]);
        let err = fetcher
            .fetch(&CancellationToken::new(), &request)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_streaming_reads_body() {
        let server = MockServer::start().await;
        let body = "<urlset>".to_string() + &"<url><loc>https://a.com/x</loc></url>".repeat(100) + "</urlset>";
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
            .mount(&server)
            .await;

        let fetcher = StreamingFetcher::new(&config()).unwrap();
        let request = FetchRequest::new(format!("{}/sitemap.xml", server.uri()), &[]);
        let outcome = fetcher
            .fetch(&CancellationToken::new(), &request)
            .await
            .unwrap();

        assert_eq!(outcome.html, body);
    }

    #[tokio::test]
    async fn test_streaming_enforces_byte_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4096)))
            .mount(&server)
            .await;

        let fetcher = StreamingFetcher::new(&FetchConfig {
            max_sitemap_bytes: 1024,
            ..config()
        })
        .unwrap();
        let request = FetchRequest::new(format!("{}/big.xml", server.uri()), &[]);
        let result = fetcher.fetch(&CancellationToken::new(), &request).await;

        assert!(matches!(result, Err(FetchError::TooLarge(1024))));
    }

    #[test]
    fn test_cookie_header_format() {
        assert_eq!(cookie_header(&[]), None);
        let jar = vec![Cookie::new("a", "1"), Cookie::new("b", "2")];
        assert_eq!(cookie_header(&jar).as_deref(), Some("a=1; b=2"));
    }
}
