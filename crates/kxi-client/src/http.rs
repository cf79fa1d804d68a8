//! Authenticated JSON client for the platform's REST services

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::error::{ClientError, Result};

/// Request timeout for every platform call
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

pub(crate) fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(concat!("kxi/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ClientError::NetworkError {
            message: e.to_string(),
        })
}

/// JSON client rooted at a service base URL, sending a bearer token
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl ApiClient {
    /// `base` is the service root; a trailing slash is added if missing
    pub fn new(mut base: Url, token: impl Into<String>) -> Result<Self> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: build_http_client()?,
            base,
            token: token.into(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Option<String>> {
        let url = self.url(path)?;
        tracing::debug!(method = %method, url = %url, "api request");

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: error_message(status, &text),
            });
        }

        Ok(if text.trim().is_empty() { None } else { Some(text) })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let text = self.send(Method::GET, path, query, None).await?;
        parse(text)
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        let text = self.send(Method::POST, path, &[], Some(body)).await?;
        parse(text)
    }

    pub async fn patch_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        let text = self.send(Method::PATCH, path, &[], Some(body)).await?;
        parse(text)
    }

    /// DELETE, returning whatever body the service sent back
    pub async fn delete(&self, path: &str) -> Result<Option<Value>> {
        match self.send(Method::DELETE, path, &[], None).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))),
            None => Ok(None),
        }
    }
}

fn parse<T: DeserializeOwned>(text: Option<String>) -> Result<T> {
    let text = text.unwrap_or_else(|| "null".to_string());
    Ok(serde_json::from_str(&text)?)
}

/// One-line description of an error response
///
/// Services report `{"message": .., "detail": {"message": ..}}`, which is
/// rendered as `message. detail`. Other JSON errors fall back to the status
/// line followed by the error text; anything else to the status line alone.
pub fn error_message(status: StatusCode, body: &str) -> String {
    let status_line = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    );

    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return status_line;
    };

    if let Some(message) = json.get("message").and_then(Value::as_str) {
        return match json
            .get("detail")
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
        {
            Some(detail) => format!("{}. {}", message, detail),
            None => message.to_string(),
        };
    }

    let other = ["errorMessage", "error", "detail"]
        .iter()
        .find_map(|key| json.get(*key).and_then(Value::as_str));
    match other {
        Some(text) => format!("{} ({})", status_line, text),
        None => status_line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_error_message_with_detail() {
        let body = r#"{"message": "Failed to deploy", "detail": {"message": "name taken"}}"#;
        assert_eq!(
            error_message(StatusCode::CONFLICT, body),
            "Failed to deploy. name taken"
        );
    }

    #[test]
    fn test_error_message_fallbacks() {
        assert_eq!(
            error_message(StatusCode::NOT_FOUND, r#"{"message": "gone"}"#),
            "gone"
        );
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"error": "bad"}"#),
            "400 Bad Request (bad)"
        );
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, "<html>"),
            "500 Internal Server Error"
        );
    }

    #[tokio::test]
    async fn test_get_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/svc/items"))
            .and(query_param("name", "a"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([1, 2])))
            .expect(1)
            .mount(&server)
            .await;

        let base = Url::parse(&format!("{}/svc", server.uri())).unwrap();
        let client = ApiClient::new(base, "tok").unwrap();
        let items: Vec<u32> = client.get_json("items", &[("name", "a")]).await.unwrap();
        assert_eq!(items, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404).set_body_json(
                serde_json::json!({"message": "Not found", "detail": {"message": "no such thing"}}),
            ))
            .mount(&server)
            .await;

        let client = ApiClient::new(Url::parse(&server.uri()).unwrap(), "tok").unwrap();
        let err = client.delete("things/x").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found. no such thing");
    }
}
