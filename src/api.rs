use std::future::Future;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::identity::Identity;

const CSRF_HEADER: &str = "X-CSRF-TOKEN";

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Request timeout: the query is taking longer than expected")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server error: {status} {message}")]
    Server { status: StatusCode, message: String },
    #[error("{0}")]
    Http(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_connect() || e.is_request() {
            ApiError::Network(e.to_string())
        } else {
            ApiError::Http(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryExample {
    #[serde(default)]
    pub category: String,
    pub title: String,
    pub query: String,
}

#[derive(Debug, Deserialize)]
struct ExamplesResponse {
    #[serde(default)]
    examples: Vec<QueryExample>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Deserialize)]
struct ChatsResponse {
    #[serde(default)]
    chats: Vec<ChatSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

/// Form payload for POST /query. Field names match the server's
/// request parameters; everything is sent form-encoded.
#[derive(Debug, Clone)]
pub struct QueryForm {
    pub query: String,
    pub chat_id: Option<String>,
    pub rerank: bool,
    pub deep_research: bool,
    pub include_sources: bool,
    pub include_execution_trace: bool,
    pub use_cascade_pattern: bool,
    pub use_routing_pattern: bool,
    pub use_cycle_pattern: bool,
    pub max_results: u32,
    pub min_confidence: f64,
}

impl Default for QueryForm {
    fn default() -> Self {
        QueryForm {
            query: String::new(),
            chat_id: None,
            rerank: false,
            deep_research: false,
            include_sources: false,
            include_execution_trace: false,
            use_cascade_pattern: false,
            use_routing_pattern: false,
            use_cycle_pattern: false,
            max_results: 10,
            min_confidence: 0.7,
        }
    }
}

impl QueryForm {
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("query", self.query.clone())];
        if let Some(chat_id) = &self.chat_id {
            params.push(("chatId", chat_id.clone()));
        }
        params.push(("rerank", self.rerank.to_string()));
        params.push(("deepResearch", self.deep_research.to_string()));
        params.push(("includeSources", self.include_sources.to_string()));
        params.push((
            "includeExecutionTrace",
            self.include_execution_trace.to_string(),
        ));
        params.push(("useCascadePattern", self.use_cascade_pattern.to_string()));
        params.push(("useRoutingPattern", self.use_routing_pattern.to_string()));
        params.push(("useCyclePattern", self.use_cycle_pattern.to_string()));
        params.push(("maxResults", self.max_results.to_string()));
        params.push(("minConfidence", self.min_confidence.to_string()));
        params
    }
}

pub struct ApiClient {
    base_url: String,
    query_timeout: Duration,
    history_page_size: usize,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: String, query_timeout: Duration, history_page_size: usize) -> Self {
        ApiClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            query_timeout,
            history_page_size,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_identity(&self, mut req: RequestBuilder, identity: &Identity) -> RequestBuilder {
        for (name, value) in identity.header_triple() {
            req = req.header(name, value);
        }
        req
    }

    /// Submit the query form and return the raw HTML document. Raced
    /// against the configured timeout; when the timer wins the request
    /// future is dropped and the connection torn down with it.
    pub async fn submit_query(
        &self,
        identity: &Identity,
        form: &QueryForm,
    ) -> Result<String, ApiError> {
        let req = self
            .with_identity(self.http.post(self.url("/query")), identity)
            .form(&form.to_params());
        race_timeout(self.query_timeout, async move {
            let response = req.send().await?;
            let response = expect_success(response).await?;
            Ok(response.text().await?)
        })
        .await
    }

    /// POST /chats/send. Redirect responses are followed by the client;
    /// the body is not interesting either way.
    pub async fn send_message(
        &self,
        identity: &Identity,
        chat_id: &str,
        message: &str,
    ) -> Result<(), ApiError> {
        let response = self
            .with_identity(self.http.post(self.url("/chats/send")), identity)
            .form(&[("message", message), ("chatId", chat_id)])
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    /// POST /chats/new. The server answers with a redirect to the page of
    /// the fresh chat; its id is recovered from the followed URL.
    pub async fn new_chat(&self, identity: &Identity) -> Result<Option<String>, ApiError> {
        let response = self
            .with_identity(self.http.post(self.url("/chats/new")), identity)
            .send()
            .await?;
        let response = expect_success(response).await?;
        Ok(chat_id_from_url(response.url()))
    }

    /// POST /chats/delete, forwarding the CSRF token when one is known.
    pub async fn delete_chat(
        &self,
        identity: &Identity,
        chat_id: &str,
        csrf_token: Option<&str>,
    ) -> Result<(), ApiError> {
        let mut params = vec![("chatId", chat_id.to_string())];
        if let Some(token) = csrf_token {
            params.push(("_csrf", token.to_string()));
        }
        let mut req = self
            .with_identity(self.http.post(self.url("/chats/delete")), identity)
            .form(&params);
        if let Some(token) = csrf_token {
            req = req.header(CSRF_HEADER, token);
        }
        let response = req.send().await?;
        expect_success(response).await?;
        Ok(())
    }

    pub async fn query_examples(
        &self,
        identity: &Identity,
    ) -> Result<Vec<QueryExample>, ApiError> {
        let response = self
            .with_identity(self.http.get(self.url("/api/v1/query/examples")), identity)
            .send()
            .await?;
        let response = expect_success(response).await?;
        Ok(response.json::<ExamplesResponse>().await?.examples)
    }

    /// Ordered message history for one chat, ascending by sequence number.
    pub async fn chat_history(
        &self,
        identity: &Identity,
        chat_id: &str,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let url = format!(
            "{}?page=0&size={}&sort=sequence_number,asc",
            self.url(&format!("/api/v1/chats/{chat_id}/history")),
            self.history_page_size,
        );
        let response = self
            .with_identity(self.http.get(url), identity)
            .send()
            .await?;
        let response = expect_success(response).await?;
        Ok(response.json::<HistoryResponse>().await?.messages)
    }

    pub async fn chats(&self, identity: &Identity) -> Result<Vec<ChatSummary>, ApiError> {
        let response = self
            .with_identity(self.http.get(self.url("/api/v1/chats")), identity)
            .send()
            .await?;
        let response = expect_success(response).await?;
        Ok(response.json::<ChatsResponse>().await?.chats)
    }
}

/// First-to-complete combinator for a request and its timeout guard.
/// The loser's outcome is never observed; a timed-out request future is
/// dropped, which also closes the underlying connection.
async fn race_timeout<T, F>(limit: Duration, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout),
    }
}

async fn expect_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        let trimmed = body.trim();
        trimmed.chars().take(200).collect()
    };
    Err(ApiError::Server { status, message })
}

fn chat_id_from_url(url: &reqwest::Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == "chatId")
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_form_carries_all_fields() {
        let form = QueryForm {
            query: "find rust experts".into(),
            chat_id: Some("chat-9".into()),
            use_cascade_pattern: true,
            ..QueryForm::default()
        };
        let params = form.to_params();
        assert_eq!(params[0], ("query", "find rust experts".to_string()));
        assert!(params.contains(&("chatId", "chat-9".to_string())));
        assert!(params.contains(&("useCascadePattern", "true".to_string())));
        assert!(params.contains(&("useCyclePattern", "false".to_string())));
        assert!(params.contains(&("maxResults", "10".to_string())));
        assert!(params.contains(&("minConfidence", "0.7".to_string())));
    }

    #[test]
    fn query_form_omits_chat_id_when_absent() {
        let params = QueryForm::default().to_params();
        assert!(params.iter().all(|(key, _)| *key != "chatId"));
    }

    #[test]
    fn chat_id_recovered_from_redirect_url() {
        let url = reqwest::Url::parse("http://localhost:8080/?chatId=abc-123").unwrap();
        assert_eq!(chat_id_from_url(&url).as_deref(), Some("abc-123"));

        let bare = reqwest::Url::parse("http://localhost:8080/").unwrap();
        assert_eq!(chat_id_from_url(&bare), None);
    }

    #[tokio::test]
    async fn race_timeout_reports_timeout_when_nothing_arrives() {
        let result: Result<String, ApiError> =
            race_timeout(Duration::from_millis(10), std::future::pending()).await;
        assert!(matches!(result, Err(ApiError::Timeout)));
    }

    #[tokio::test]
    async fn race_timeout_passes_through_the_winner() {
        let result = race_timeout(Duration::from_secs(300), async { Ok::<_, ApiError>(7) }).await;
        assert_eq!(result.unwrap(), 7);

        let failed: Result<i32, _> = race_timeout(Duration::from_secs(300), async {
            Err(ApiError::Network("unreachable".into()))
        })
        .await;
        assert!(matches!(failed, Err(ApiError::Network(_))));
    }

    #[test]
    fn chats_payload_deserializes_camel_case() {
        let payload = r#"{"chats":[{"id":"c1","name":"First","createdAt":"2026-08-29T10:00:00","isDefault":true}]}"#;
        let parsed: ChatsResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.chats.len(), 1);
        assert!(parsed.chats[0].is_default);
        assert_eq!(parsed.chats[0].created_at, "2026-08-29T10:00:00");
    }

    #[test]
    fn history_payload_preserves_order() {
        let payload = r#"{"messages":[{"role":"user","content":"q"},{"role":"assistant","content":"a"}]}"#;
        let parsed: HistoryResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.messages[0].role, "user");
        assert_eq!(parsed.messages[1].role, "assistant");
    }
}
