//! Submission API
//!
//! The ordinary request/response side of the protocol. A streamed answer
//! starts with [`SubmissionApi::submit`], which returns the correlation id
//! that push events will carry. [`SubmissionApi::complete`] is the
//! synchronous fallback: one round trip, whole answer, no session.
//!
//! # Endpoints
//!
//! | Call                  | Request                                          |
//! |-----------------------|--------------------------------------------------|
//! | `create_conversation` | `POST {base}/conversations`                      |
//! | `submit`              | `POST {base}/conversations/{id}/messages/stream` |
//! | `complete`            | `POST {base}/conversations/{id}/messages`        |
//!
//! The tenant travels in the `X-Tenant-Id` header.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ConversationId, CorrelationId, TenantId, UserMessageId};
use crate::protocol::SuggestedAction;

/// Header carrying the tenant scope
pub const TENANT_HEADER: &str = "X-Tenant-Id";

/// Errors from the submission endpoints
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// Request could not be sent or the response not read
    #[error("submission request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("submission rejected with status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// Client could not be built from configuration
    #[error("invalid submission configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// Wire types
// ============================================================================

/// A user message to answer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Message text
    pub content: String,
    /// Server-issued conversation id
    pub conversation_id: ConversationId,
    /// Free-form context forwarded to the server
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SubmitRequest {
    /// Request without metadata
    #[must_use]
    pub fn new(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            conversation_id,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Accepted streamed submission
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    /// Key for every push event of the answer
    pub request_correlation_id: CorrelationId,
    /// Conversation the message was stored in
    pub conversation_id: ConversationId,
    /// Id of the persisted user message
    pub user_message_id: UserMessageId,
}

/// Whole answer from the synchronous fallback
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackAnswer {
    /// Conversation the exchange was stored in
    pub conversation_id: ConversationId,
    /// Complete answer
    pub content: String,
    /// Follow-up suggestions
    #[serde(default)]
    pub suggested_actions: Vec<SuggestedAction>,
}

#[derive(Serialize)]
struct CreateConversation<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreatedConversation {
    id: ConversationId,
}

// ============================================================================
// Trait
// ============================================================================

/// Request/response collaborator of the streaming client
#[async_trait]
pub trait SubmissionApi: Send + Sync {
    /// Persist a new conversation and return its server id
    async fn create_conversation(
        &self,
        tenant: Option<&TenantId>,
        title: Option<&str>,
    ) -> Result<ConversationId, SubmissionError>;

    /// Start a streamed answer
    async fn submit(
        &self,
        tenant: Option<&TenantId>,
        request: &SubmitRequest,
    ) -> Result<SubmitReceipt, SubmissionError>;

    /// Get the whole answer in one round trip
    async fn complete(
        &self,
        tenant: Option<&TenantId>,
        request: &SubmitRequest,
    ) -> Result<FallbackAnswer, SubmissionError>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Settings for [`HttpSubmissionApi`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionConfig {
    /// API root, e.g. `https://assist.example.com/api`
    pub base_url: String,
    /// Sent as `Authorization: Bearer …` when present
    pub bearer_token: Option<String>,
    /// Upper bound for one request
    pub request_timeout: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            bearer_token: None,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// [`SubmissionApi`] over HTTP with `reqwest`
#[derive(Clone, Debug)]
pub struct HttpSubmissionApi {
    base_url: reqwest::Url,
    bearer_token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpSubmissionApi {
    /// Build the client
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the base URL is empty or unusable, or the HTTP
    /// client cannot be built.
    pub fn new(config: &SubmissionConfig) -> Result<Self, SubmissionError> {
        let trimmed = config.base_url.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(SubmissionError::InvalidConfig("base URL is empty".into()));
        }
        let base_url = reqwest::Url::parse(trimmed)
            .map_err(|e| SubmissionError::InvalidConfig(format!("base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SubmissionError::InvalidConfig(format!(
                "base URL cannot carry a path: {trimmed}"
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SubmissionError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            base_url,
            bearer_token: config.bearer_token.clone(),
            http_client,
        })
    }

    /// API root
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Base URL plus `segments`, each percent-encoded as one path segment
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, SubmissionError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| SubmissionError::InvalidConfig("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn conversations_url(&self) -> Result<reqwest::Url, SubmissionError> {
        self.endpoint(&["conversations"])
    }

    fn stream_url(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<reqwest::Url, SubmissionError> {
        self.endpoint(&["conversations", conversation_id.as_str(), "messages", "stream"])
    }

    fn messages_url(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<reqwest::Url, SubmissionError> {
        self.endpoint(&["conversations", conversation_id.as_str(), "messages"])
    }

    fn post(&self, url: reqwest::Url, tenant: Option<&TenantId>) -> reqwest::RequestBuilder {
        let mut builder = self.http_client.post(url);
        if let Some(tenant) = tenant {
            builder = builder.header(TENANT_HEADER, tenant.as_str());
        }
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SubmissionError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubmissionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl SubmissionApi for HttpSubmissionApi {
    async fn create_conversation(
        &self,
        tenant: Option<&TenantId>,
        title: Option<&str>,
    ) -> Result<ConversationId, SubmissionError> {
        let response = self
            .post(self.conversations_url()?, tenant)
            .json(&CreateConversation { title })
            .send()
            .await?;
        let created: CreatedConversation = Self::read_json(response).await?;
        tracing::debug!(conversation_id = %created.id, "conversation created");
        Ok(created.id)
    }

    async fn submit(
        &self,
        tenant: Option<&TenantId>,
        request: &SubmitRequest,
    ) -> Result<SubmitReceipt, SubmissionError> {
        let response = self
            .post(self.stream_url(&request.conversation_id)?, tenant)
            .json(request)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn complete(
        &self,
        tenant: Option<&TenantId>,
        request: &SubmitRequest,
    ) -> Result<FallbackAnswer, SubmissionError> {
        let response = self
            .post(self.messages_url(&request.conversation_id)?, tenant)
            .json(request)
            .send()
            .await?;
        Self::read_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let api = HttpSubmissionApi::new(&SubmissionConfig {
            base_url: "https://assist.example.com/api/".into(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(api.base_url(), "https://assist.example.com/api");
        assert_eq!(
            api.stream_url(&"c-1".into()).unwrap().as_str(),
            "https://assist.example.com/api/conversations/c-1/messages/stream"
        );
        assert_eq!(
            api.messages_url(&"c-1".into()).unwrap().as_str(),
            "https://assist.example.com/api/conversations/c-1/messages"
        );
    }

    #[test]
    fn test_conversation_id_is_one_encoded_segment() {
        let api = HttpSubmissionApi::new(&SubmissionConfig {
            base_url: "https://assist.example.com/api".into(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            api.messages_url(&"a/b c?x".into()).unwrap().as_str(),
            "https://assist.example.com/api/conversations/a%2Fb%20c%3Fx/messages"
        );
    }

    #[test]
    fn test_unparseable_base_url_rejected() {
        let result = HttpSubmissionApi::new(&SubmissionConfig {
            base_url: "not a url".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(SubmissionError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let result = HttpSubmissionApi::new(&SubmissionConfig {
            base_url: "/".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(SubmissionError::InvalidConfig(_))));
    }

    #[test]
    fn test_submit_request_wire_shape() {
        let mut request = SubmitRequest::new("c-1".into(), "Which guarantees expire?");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"content": "Which guarantees expire?", "conversationId": "c-1"})
        );

        request
            .metadata
            .insert("channel".into(), json!("workspace"));
        assert_eq!(
            serde_json::to_value(&request).unwrap()["metadata"],
            json!({"channel": "workspace"})
        );
    }

    #[test]
    fn test_receipt_and_fallback_decode() {
        let receipt: SubmitReceipt = serde_json::from_value(json!({
            "requestCorrelationId": "r-1",
            "conversationId": "c-1",
            "userMessageId": "m-1"
        }))
        .unwrap();
        assert_eq!(receipt.request_correlation_id.as_str(), "r-1");

        let answer: FallbackAnswer = serde_json::from_value(json!({
            "conversationId": "c-1",
            "content": "Three guarantees expire this month."
        }))
        .unwrap();
        assert!(answer.suggested_actions.is_empty());
    }
}
