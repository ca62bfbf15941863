//! REST implementation of the remote gateway.
//!
//! Records live under `{base}/users/{user_id}/{kind}` and every response is
//! wrapped in the `{ "success": .., "data": .. }` envelope.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{RemoteGateway, RemoveOutcome};
use crate::config::Config;
use crate::errors::RemoteError;
use crate::models::SyncRecord;

/// Success or error envelope returned by the remote store.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEnvelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<ErrorDetails>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    code: String,
    message: String,
}

/// HTTP gateway for one record type.
pub struct HttpGateway<T> {
    client: Client,
    base_url: Url,
    token: Option<String>,
    _record: PhantomData<fn() -> T>,
}

impl<T: SyncRecord> HttpGateway<T> {
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::InvalidEndpoint(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidEndpoint(base_url.to_string()));
        }

        Ok(Self {
            client,
            base_url,
            token,
            _record: PhantomData,
        })
    }

    /// Build a gateway from configuration with its own client.
    pub fn from_config(config: &Config) -> Result<Self, RemoteError> {
        Self::new(
            build_client(config.remote_timeout)?,
            &config.remote_url,
            config.api_token.clone(),
        )
    }

    fn endpoint(&self, user_id: &str, id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["users", user_id, T::KIND.path_segment()]);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, RemoteError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(status_error(status, response.text().await.unwrap_or_default()));
        }

        let envelope: ApiEnvelope<R> = response.json().await?;
        if !envelope.success {
            let message = envelope
                .error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| "request rejected".to_string());
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message,
            });
        }

        envelope
            .data
            .ok_or_else(|| RemoteError::Decode("response envelope has no data".to_string()))
    }
}

/// Client with the configured request timeout.
fn build_client(timeout: Duration) -> Result<Client, RemoteError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RemoteError::InvalidEndpoint(format!("failed to build HTTP client: {}", e)))
}

fn status_error(status: StatusCode, body: String) -> RemoteError {
    let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
        .ok()
        .and_then(|envelope| envelope.error)
        .map(|e| e.message)
        .unwrap_or(body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        _ => RemoteError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl<T: SyncRecord> RemoteGateway<T> for HttpGateway<T> {
    async fn fetch_all(&self, user_id: &str) -> Result<Vec<T>, RemoteError> {
        let url = self.endpoint(user_id, None);
        self.send(self.request(Method::GET, url)).await
    }

    async fn create(&self, user_id: &str, draft: &T::Draft) -> Result<T, RemoteError> {
        let url = self.endpoint(user_id, None);
        self.send(self.request(Method::POST, url).json(draft)).await
    }

    async fn update(&self, user_id: &str, record: &T) -> Result<T, RemoteError> {
        let url = self.endpoint(user_id, Some(record.id()));
        self.send(self.request(Method::PUT, url).json(record)).await
    }

    async fn remove(&self, user_id: &str, id: &str) -> Result<RemoveOutcome, RemoteError> {
        let url = self.endpoint(user_id, Some(id));
        let response = self.request(Method::DELETE, url).send().await?;
        let status = response.status();

        // Any 2xx is a completed delete; the body may be empty (204).
        if status.is_success() {
            return Ok(RemoveOutcome::Removed);
        }

        match status_error(status, response.text().await.unwrap_or_default()) {
            RemoteError::NotFound(_) => Ok(RemoveOutcome::NotFound),
            e => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Collection, Outfit};

    #[test]
    fn test_endpoint_layout() {
        let gateway: HttpGateway<Outfit> =
            HttpGateway::new(Client::new(), "http://localhost:8080/api/", None).unwrap();

        assert_eq!(
            gateway.endpoint("u1", None).as_str(),
            "http://localhost:8080/api/users/u1/outfits"
        );
        assert_eq!(
            gateway.endpoint("u1", Some("2024-05-01")).as_str(),
            "http://localhost:8080/api/users/u1/outfits/2024-05-01"
        );
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let gateway: HttpGateway<Collection> =
            HttpGateway::new(Client::new(), "http://localhost/api", None).unwrap();

        assert_eq!(
            gateway.endpoint("a/b", Some("x y")).as_str(),
            "http://localhost/api/users/a%2Fb/collections/x%20y"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = HttpGateway::<Outfit>::new(Client::new(), "not a url", None);
        assert!(matches!(result, Err(RemoteError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_envelope_without_data_decodes() {
        let body = r#"{"success":false,"error":{"code":"NOT_FOUND","message":"gone"}}"#;
        let envelope: ApiEnvelope<Outfit> = serde_json::from_str(body).unwrap();

        assert!(!envelope.success);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.error.unwrap().message, "gone");

        let envelope: ApiEnvelope<Vec<Collection>> =
            serde_json::from_str(r#"{"success":true,"data":[]}"#).unwrap();
        assert_eq!(envelope.data, Some(Vec::new()));
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, String::new()),
            RemoteError::Unauthorized(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, String::new()),
            RemoteError::NotFound(_)
        ));

        let body = r#"{"success":false,"error":{"code":"INTERNAL_ERROR","message":"boom"}}"#;
        assert_eq!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, body.to_string()),
            RemoteError::Status {
                status: 500,
                message: "boom".to_string()
            }
        );
    }
}
