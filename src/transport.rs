use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};

use crate::error::SyncError;
use crate::models::Credentials;

/// "Fetch the body for a URL". Plugins never talk to a concrete client.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn get(&self, url: &Url, credentials: Option<&Credentials>) -> Result<String, SyncError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// The timeout is applied to every request; it must be finite.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, SyncError> {
        if timeout.is_zero() {
            return Err(SyncError::config("http timeout must be greater than zero"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|err| SyncError::config(format!("http client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn get(&self, url: &Url, credentials: Option<&Credentials>) -> Result<String, SyncError> {
        let mut request = self.client.get(url.clone());
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        tracing::debug!(%url, "fetching feed page");
        let response = request
            .send()
            .await
            .map_err(|err| SyncError::transport(format!("request failed for {url}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::transport(format!(
                "non-success status {status} for {url}"
            )));
        }
        response
            .text()
            .await
            .map_err(|err| SyncError::transport(format!("unable to read body for {url}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new(Duration::from_secs(5), "EventSync/test").unwrap()
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(matches!(
            HttpTransport::new(Duration::ZERO, "x"),
            Err(SyncError::Config(_))
        ));
    }

    #[tokio::test]
    async fn returns_body_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<rss/>"))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/rss", server.uri())).unwrap();
        let body = transport().get(&url, None).await.unwrap();
        assert_eq!(body, "<rss/>");
    }

    #[tokio::test]
    async fn non_success_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let err = transport().get(&url, None).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
    }

    #[tokio::test]
    async fn sends_basic_auth_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let creds = Credentials {
            username: "svc".into(),
            password: "secret".into(),
        };
        let url = Url::parse(&server.uri()).unwrap();
        assert_eq!(transport().get(&url, Some(&creds)).await.unwrap(), "ok");
    }
}
