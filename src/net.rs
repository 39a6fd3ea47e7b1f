//! Network fetch primitive.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::debug;

use crate::cache::{AssetRequest, AssetResponse};

const USER_AGENT: &str = concat!("precache/", env!("CARGO_PKG_VERSION"));

/// Anything that can turn a request into a response.
///
/// An HTTP error status is still a response; only transport failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse>;
}

/// Fetcher backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(USER_AGENT)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    debug!(url = %request.url, status, bytes = body.len(), "fetched");

    Ok(AssetResponse {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::HeaderValue;
  use url::Url;
  use wiremock::matchers::{header_exists, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn fetcher() -> HttpFetcher {
    HttpFetcher::new(Duration::from_secs(5)).unwrap()
  }

  fn request(server: &MockServer, p: &str) -> AssetRequest {
    AssetRequest::get(Url::parse(&format!("{}{}", server.uri(), p)).unwrap())
  }

  #[tokio::test]
  async fn test_fetch_returns_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/index.html"))
      .and(header_exists("user-agent"))
      .respond_with(
        ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"),
      )
      .expect(1)
      .mount(&server)
      .await;

    let response = fetcher()
      .fetch(&request(&server, "/index.html"))
      .await
      .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"<html></html>");
    assert_eq!(response.header("content-type"), Some(&b"text/html"[..]));
  }

  #[tokio::test]
  async fn test_non_utf8_header_values_are_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/"))
      .respond_with(
        ResponseTemplate::new(200)
          .insert_header("x-name", HeaderValue::from_bytes(b"caf\xe9").unwrap())
          .insert_header("etag", "abc"),
      )
      .mount(&server)
      .await;

    let response = fetcher().fetch(&request(&server, "/")).await.unwrap();

    assert_eq!(response.header("x-name"), Some(&b"caf\xe9"[..]));
    assert_eq!(response.header("etag"), Some(&b"abc"[..]));
  }

  #[tokio::test]
  async fn test_error_status_is_a_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/missing.png"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let response = fetcher()
      .fetch(&request(&server, "/missing.png"))
      .await
      .unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.is_success());
  }

  #[tokio::test]
  async fn test_transport_failure_is_an_error() {
    let url = Url::parse("http://127.0.0.1:1/").unwrap();
    let result = fetcher().fetch(&AssetRequest::get(url)).await;
    assert!(result.is_err());
  }
}
