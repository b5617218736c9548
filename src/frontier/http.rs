use super::{FrontierApi, FrontierError, PendingBatch, UrlListing};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

/// Frontier query client for a remote frontier service
///
/// Endpoints are resolved against the base URL: `pending-urls?site=&limit=` and
/// `all-urls?site=`.
pub struct HttpFrontierApi {
    client: Client,
    base: Url,
}

impl HttpFrontierApi {
    pub fn new(client: Client, base: &str) -> Result<Self, FrontierError> {
        let mut base =
            Url::parse(base).map_err(|_| FrontierError::InvalidEndpoint(base.to_string()))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(FrontierError::InvalidEndpoint(base.to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { client, base })
    }

    fn endpoint(&self, name: &str) -> Result<Url, FrontierError> {
        self.base
            .join(name)
            .map_err(|_| FrontierError::InvalidEndpoint(format!("{}{}", self.base, name)))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, FrontierError> {
        debug!(url = %url, "Frontier query");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FrontierError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl FrontierApi for HttpFrontierApi {
    async fn pending_urls(&self, site_id: &str, limit: u32) -> Result<PendingBatch, FrontierError> {
        let mut url = self.endpoint("pending-urls")?;
        url.query_pairs_mut()
            .append_pair("site", site_id)
            .append_pair("limit", &limit.to_string());
        self.get_json(url).await
    }

    async fn all_urls(&self, site_id: &str) -> Result<Vec<String>, FrontierError> {
        let mut url = self.endpoint("all-urls")?;
        url.query_pairs_mut().append_pair("site", site_id);
        let listing: UrlListing = self.get_json(url).await?;
        Ok(listing.urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_pending_urls_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/pending-urls"))
            .and(query_param("site", "s1"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"urls":[{"url":"https://a.com/1","depth":0},{"url":"https://a.com/2","depth":1}],"allIndexed":false,"inRetry":false,"totalURLs":5,"indexedURLs":3}"#,
            ))
            .mount(&server)
            .await;

        let api = HttpFrontierApi::new(Client::new(), &format!("{}/api", server.uri())).unwrap();
        let batch = api.pending_urls("s1", 2).await.unwrap();

        assert_eq!(batch.urls.len(), 2);
        assert_eq!(batch.urls[1].depth, 1);
        assert_eq!(batch.total_urls, 5);
    }

    #[tokio::test]
    async fn test_all_urls_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/all-urls"))
            .and(query_param("site", "s1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"urls":["https://a.com/1","https://a.com/2"]}"#),
            )
            .mount(&server)
            .await;

        let api = HttpFrontierApi::new(Client::new(), &server.uri()).unwrap();
        let urls = api.all_urls("s1").await.unwrap();

        assert_eq!(urls, vec!["https://a.com/1", "https://a.com/2"]);
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = HttpFrontierApi::new(Client::new(), &server.uri()).unwrap();
        let err = api.pending_urls("s1", 10).await.unwrap_err();

        assert!(matches!(err, FrontierError::Status(500)));
    }
}
