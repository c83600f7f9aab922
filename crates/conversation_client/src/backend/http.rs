use std::time::Duration;

use async_trait::async_trait;
use chat_core::config::{Config, ProxyAuth};
use chat_core::{CompleteResponse, Conversation, Message, Token};
use log::{debug, error, info};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, Proxy, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;

use super::{AgentBackend, AgentRequest, ConversationStore};
use crate::auth::Credentials;
use crate::error::{ChatClientError, Result};
use crate::stream::{parse_event_stream, EventStream};

fn apply_proxy_auth(proxy: Proxy, auth: Option<&ProxyAuth>) -> Proxy {
    let Some(auth) = auth else {
        return proxy;
    };
    if auth.username.is_empty() {
        return proxy;
    }
    proxy.basic_auth(&auth.username, &auth.password)
}

#[derive(Deserialize)]
struct CreatedConversation {
    #[serde(alias = "conversationId", alias = "conversation_id")]
    id: String,
}

/// HTTP client for the planning backend.
///
/// Streaming requests use a plain client because the session's retry
/// controller owns their retries. History-store queries are idempotent and go
/// through the transient-retry middleware.
#[derive(Debug, Clone)]
pub struct HttpConversationBackend {
    stream_client: Client,
    query_client: ClientWithMiddleware,
    api_base: String,
    credentials: Credentials,
    resume_timeout: Duration,
}

impl HttpConversationBackend {
    pub fn new(config: &Config, credentials: Credentials) -> Result<Self> {
        let client = Self::build_http_client(config)?;
        let query_client = Self::build_retry_client(client.clone(), config.query_max_retries);

        Ok(Self {
            stream_client: client,
            query_client,
            api_base: config.api_base().to_string(),
            credentials,
            resume_timeout: Duration::from_secs(config.resume_timeout_secs),
        })
    }

    fn build_http_client(config: &Config) -> Result<Client> {
        let mut builder = Client::builder().default_headers(Self::get_default_headers());
        if config.http_proxy.is_empty() && config.https_proxy.is_empty() {
            builder = builder.no_proxy();
        }
        if !config.http_proxy.is_empty() {
            let mut proxy = Proxy::http(&config.http_proxy)?;
            proxy = apply_proxy_auth(proxy, config.http_proxy_auth.as_ref());
            builder = builder.proxy(proxy);
        }
        if !config.https_proxy.is_empty() {
            let mut proxy = Proxy::https(&config.https_proxy)?;
            proxy = apply_proxy_auth(proxy, config.https_proxy_auth.as_ref());
            builder = builder.proxy(proxy);
        }
        Ok(builder.build()?)
    }

    fn build_retry_client(client: Client, max_retries: u32) -> ClientWithMiddleware {
        if max_retries == 0 {
            return ClientBuilder::new(client).build();
        }

        // Exponential backoff with jitter for idempotent reads
        let retry_policy = ExponentialBackoff::builder()
            .base(2)
            .retry_bounds(Duration::from_millis(200), Duration::from_secs(5))
            .build_with_max_retries(max_retries);

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut header = HeaderMap::new();
        header.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("planner-conversation-client/", env!("CARGO_PKG_VERSION"))),
        );
        header.insert(ACCEPT, HeaderValue::from_static("application/json"));
        header
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn conversation_url(&self, conversation_id: &str, suffix: &str) -> String {
        format!("{}/conversations/{}{}", self.api_base, conversation_id, suffix)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut request = self.query_client.get(url).query(query);
        if let Some(token) = self.credentials.access_token() {
            request = request.bearer_auth(token);
        }

        debug!("GET {}", url);
        let response = check_status(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Map non-2xx responses to errors; 401/403 become authentication failures.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ChatClientError::Unauthorized(status.as_u16()));
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    error!("Request to {} failed with {}: {}", url, status, body);
    Err(ChatClientError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl AgentBackend for HttpConversationBackend {
    async fn create_conversation(
        &self,
        access_token: &str,
        stage_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<String> {
        let url = format!("{}/conversations", self.api_base);
        info!("Creating conversation for stage {}", stage_id);

        let response = self
            .stream_client
            .post(&url)
            .bearer_auth(access_token)
            .json(&serde_json::json!({
                "stageId": stage_id,
                "metadata": metadata,
            }))
            .send()
            .await?;

        let created: CreatedConversation = check_status(response).await?.json().await?;
        info!("Created conversation {}", created.id);
        Ok(created.id)
    }

    async fn stream_agent_response(
        &self,
        access_token: &str,
        request: &AgentRequest,
    ) -> Result<EventStream> {
        let url = self.conversation_url(&request.conversation_id, "/stream");

        let mut builder = self
            .stream_client
            .post(&url)
            .bearer_auth(access_token)
            .header(ACCEPT, "text/event-stream")
            .json(request);
        if request.is_resume() {
            builder = builder.timeout(self.resume_timeout);
        }

        info!(
            "[{}] Opening {} stream",
            request.conversation_id,
            if request.is_resume() { "resumed" } else { "new" }
        );
        let response = check_status(builder.send().await?).await?;
        Ok(parse_event_stream(response.bytes_stream()))
    }
}

#[async_trait]
impl ConversationStore for HttpConversationBackend {
    async fn conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.get_json(&self.conversation_url(conversation_id, ""), &[])
            .await
    }

    async fn tokens(&self, conversation_id: &str, after_index: Option<u64>) -> Result<Vec<Token>> {
        let query: Vec<(&str, String)> = after_index
            .map(|index| vec![("after", index.to_string())])
            .unwrap_or_default();
        self.get_json(&self.conversation_url(conversation_id, "/tokens"), &query)
            .await
    }

    async fn complete_response(&self, conversation_id: &str) -> Result<Option<CompleteResponse>> {
        match self
            .get_json::<Option<CompleteResponse>>(
                &self.conversation_url(conversation_id, "/complete-response"),
                &[],
            )
            .await
        {
            Err(ChatClientError::Status { status: 404, .. }) => Ok(None),
            other => other,
        }
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.get_json(&self.conversation_url(conversation_id, "/messages"), &[])
            .await
    }
}
