use reqwest::{Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::session::SessionStore;

/// Upper bound on the delay between read retries
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// HTTP client for the task service.
///
/// Every request carries `Authorization: Bearer <token>` when the session
/// store holds an access token; without one the request goes out
/// unauthenticated. Reads may be retried on transient failures, writes never.
#[derive(Clone)]
pub struct HttpClient {
  http: reqwest::Client,
  base_url: Url,
  session: SessionStore,
  timeout_secs: u64,
  read_attempts: u32,
  retry_delay: Duration,
}

impl HttpClient {
  pub fn new(config: &ApiConfig, session: SessionStore) -> Result<Self> {
    let base_url = Url::parse(&config.url)
      .map_err(|e| Error::Internal(format!("invalid API url '{}': {}", config.url, e)))?;
    if base_url.cannot_be_a_base() {
      return Err(Error::Internal(format!("invalid API url '{}'", config.url)));
    }

    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;

    Ok(Self {
      http,
      base_url,
      session,
      timeout_secs: config.timeout_secs,
      read_attempts: config.read_attempts.max(1),
      retry_delay: Duration::from_secs(1),
    })
  }

  /// Base delay between read retries; doubles after each attempt.
  #[cfg(test)]
  pub fn with_retry_delay(mut self, delay: Duration) -> Self {
    self.retry_delay = delay;
    self
  }

  /// Append `path` to the base url, one percent-encoded segment each, so
  /// no segment can introduce `/`, `?` or `#`.
  fn url(&self, path: &[&str], query: &[(&str, String)]) -> Result<Url> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| Error::Internal(format!("invalid API url '{}'", self.base_url)))?
      .pop_if_empty()
      .extend(path);
    if !query.is_empty() {
      url
        .query_pairs_mut()
        .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
    }
    Ok(url)
  }

  fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
    let builder = self.http.request(method, url);
    Ok(match self.session.access_token()? {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    })
  }

  /// Send once, turning transport failures and non-2xx responses into errors.
  async fn send(&self, method: Method, url: Url, body: Option<&serde_json::Value>) -> Result<Response> {
    let mut builder = self.request(method.clone(), url.clone())?;
    if let Some(body) = body {
      builder = builder.json(body);
    }

    let started = Instant::now();
    let response = builder.send().await.map_err(|e| self.transport_error(e))?;
    let status = response.status();
    debug!(
      method = %method,
      path = url.path(),
      status = status.as_u16(),
      elapsed_ms = started.elapsed().as_millis() as u64,
      "request finished"
    );

    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::Http {
      status: status.as_u16(),
      body,
    })
  }

  fn transport_error(&self, e: reqwest::Error) -> Error {
    if e.is_timeout() {
      Error::Timeout(self.timeout_secs)
    } else {
      Error::Connectivity(e.to_string())
    }
  }

  async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
    let bytes = response
      .bytes()
      .await
      .map_err(|e| self.transport_error(e))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Decode(e.to_string()))
  }

  fn encode<B: Serialize>(body: &B) -> Result<serde_json::Value> {
    serde_json::to_value(body).map_err(|e| Error::Decode(e.to_string()))
  }

  /// GET with the configured read retry policy.
  pub async fn get<T: DeserializeOwned>(&self, path: &[&str], query: &[(&str, String)]) -> Result<T> {
    self.get_with_attempts(path, query, self.read_attempts).await
  }

  /// GET without retries.
  pub async fn get_once<T: DeserializeOwned>(&self, path: &[&str]) -> Result<T> {
    self.get_with_attempts(path, &[], 1).await
  }

  async fn get_with_attempts<T: DeserializeOwned>(
    &self,
    path: &[&str],
    query: &[(&str, String)],
    attempts: u32,
  ) -> Result<T> {
    let url = self.url(path, query)?;
    let mut attempt = 1;
    loop {
      match self.send(Method::GET, url.clone(), None).await {
        Ok(response) => return self.decode(response).await,
        Err(e) if e.is_transient() && attempt < attempts => {
          let delay = self
            .retry_delay
            .saturating_mul(1 << (attempt - 1).min(16))
            .min(MAX_RETRY_DELAY);
          warn!(path = url.path(), attempt, error = %e, "read failed, retrying in {:?}", delay);
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }

  pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &[&str], body: &B) -> Result<T> {
    let body = Self::encode(body)?;
    let response = self.send(Method::POST, self.url(path, &[])?, Some(&body)).await?;
    self.decode(response).await
  }

  /// POST without a body, ignoring whatever the server returns.
  pub async fn post_empty(&self, path: &[&str]) -> Result<()> {
    self.send(Method::POST, self.url(path, &[])?, None).await?;
    Ok(())
  }

  pub async fn patch<B: Serialize, T: DeserializeOwned>(&self, path: &[&str], body: &B) -> Result<T> {
    let body = Self::encode(body)?;
    let response = self.send(Method::PATCH, self.url(path, &[])?, Some(&body)).await?;
    self.decode(response).await
  }

  /// DELETE; the server answers 204 with no body.
  pub async fn delete(&self, path: &[&str]) -> Result<()> {
    self.send(Method::DELETE, self.url(path, &[])?, None).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::Session;
  use crate::testing::FakeApi;
  use serde_json::Value;

  fn client(api: &FakeApi, session: SessionStore) -> HttpClient {
    HttpClient::new(&api.config(), session)
      .unwrap()
      .with_retry_delay(Duration::from_millis(1))
  }

  #[tokio::test]
  async fn test_bearer_header_only_with_token() {
    let api = FakeApi::start().await;
    let session = SessionStore::in_memory();
    let http = client(&api, session.clone());

    let _: Value = http.get(&["tasks"], &[]).await.unwrap();
    assert_eq!(api.last_authorization(), None);

    session
      .set(&Session {
        access_token: "abc".to_string(),
        refresh_token: "def".to_string(),
      })
      .unwrap();
    let _: Value = http.get(&["tasks"], &[]).await.unwrap();
    assert_eq!(api.last_authorization().as_deref(), Some("Bearer abc"));
  }

  #[tokio::test]
  async fn test_http_error_carries_status_and_body() {
    let api = FakeApi::start().await;
    let http = client(&api, SessionStore::in_memory());

    let err = http.get::<Value>(&["tasks", "missing"], &[]).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    match err {
      Error::Http { body, .. } => assert!(body.contains("not found")),
      other => panic!("unexpected error {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_reads_retry_transient_failures() {
    let api = FakeApi::start().await;
    let http = client(&api, SessionStore::in_memory());

    api.fail_next("list_tasks", 503, 2);
    let page: Value = http.get(&["tasks"], &[]).await.unwrap();
    assert!(page["data"].is_array());
    assert_eq!(api.calls("list_tasks"), 3);

    api.fail_next("list_tasks", 503, 3);
    let err = http.get::<Value>(&["tasks"], &[]).await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert_eq!(api.calls("list_tasks"), 6);

    api.fail_next("list_tasks", 400, 1);
    assert_eq!(http.get::<Value>(&["tasks"], &[]).await.unwrap_err().status(), Some(400));
    assert_eq!(api.calls("list_tasks"), 7);
  }

  #[tokio::test]
  async fn test_writes_are_not_retried() {
    let api = FakeApi::start().await;
    let http = client(&api, SessionStore::in_memory());

    api.fail_next("create_task", 503, 1);
    let err = http
      .post::<_, Value>(&["tasks"], &serde_json::json!({"name": "x"}))
      .await
      .unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert_eq!(api.calls("create_task"), 1);
  }

  #[tokio::test]
  async fn test_connectivity_error() {
    let config = ApiConfig {
      url: "http://127.0.0.1:1".to_string(),
      read_attempts: 1,
      ..ApiConfig::default()
    };
    let http = HttpClient::new(&config, SessionStore::in_memory()).unwrap();
    let err = http.get::<Value>(&["tasks"], &[]).await.unwrap_err();
    assert!(matches!(err, Error::Connectivity(_)), "got {:?}", err);
  }

  #[tokio::test]
  async fn test_timeout() {
    let api = FakeApi::start().await;
    let config = ApiConfig {
      timeout_secs: 1,
      read_attempts: 1,
      ..api.config()
    };
    let http = HttpClient::new(&config, SessionStore::in_memory()).unwrap();

    api.delay_next("list_tasks", Duration::from_millis(1500));
    let err = http.get::<Value>(&["tasks"], &[]).await.unwrap_err();
    assert_eq!(err, Error::Timeout(1));
  }
}
