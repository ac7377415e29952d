pub mod dto;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use tracing::debug;

use crate::error::{AppError, RemoteError};
use crate::models::{Task, TaskDraft};

pub use dto::{AuthSession, Credentials, ListQuery, Registration, TaskPage, User};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api/";

#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// The backing task service.
///
/// Every call is a single request; retry policy belongs to the caller.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<AuthSession, RemoteError>;
    async fn register(&self, registration: &Registration) -> Result<AuthSession, RemoteError>;
    async fn list(&self, query: &ListQuery) -> Result<TaskPage, RemoteError>;
    async fn get(&self, id: i64) -> Result<Task, RemoteError>;
    async fn create(&self, draft: &TaskDraft) -> Result<Task, RemoteError>;
    async fn update(&self, id: i64, draft: &TaskDraft) -> Result<Task, RemoteError>;
    async fn delete(&self, id: i64) -> Result<(), RemoteError>;
}

pub struct HttpRemoteClient {
    client: Client,
    config: RemoteConfig,
    base: Url,
}

impl HttpRemoteClient {
    pub fn new(config: RemoteConfig) -> Result<Self, AppError> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .map_err(|e| AppError::BadRequest(format!("Invalid API base url {}: {}", base, e)))?;

        let client = Client::builder()
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::BadRequest(format!("Failed to build http client: {}", e)))?;

        Ok(Self { client, config, base })
    }

    /// Whether the service answers at all; any HTTP status counts as reachable.
    pub async fn probe(&self) -> bool {
        self.client.get(self.base.clone()).send().await.is_ok()
    }

    fn url(&self, path: &str) -> Result<Url, RemoteError> {
        self.base
            .join(path)
            .map_err(|e| RemoteError::Network(format!("invalid url {}: {}", path, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");

        match &self.config.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<dto::Envelope, RemoteError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), api_message(&body)));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(dto::Envelope::default());
        }

        serde_json::from_str(&body).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn login(&self, credentials: &Credentials) -> Result<AuthSession, RemoteError> {
        let url = self.url("auth/login")?;
        let response = self.request(Method::POST, url).json(credentials).send().await?;
        read_session(response).await
    }

    async fn register(&self, registration: &Registration) -> Result<AuthSession, RemoteError> {
        let url = self.url("auth/register")?;
        let response = self.request(Method::POST, url).json(registration).send().await?;
        read_session(response).await
    }

    async fn list(&self, query: &ListQuery) -> Result<TaskPage, RemoteError> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("limit", query.limit.to_string()),
        ];
        if let Some(status) = query.status {
            params.push(("status", status.as_str().to_string()));
        }
        if let Some(search) = &query.query {
            params.push(("search", search.clone()));
        }

        let url = Url::parse_with_params(self.url("chores")?.as_str(), &params)
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let envelope = self.send(self.request(Method::GET, url)).await?;
        let page = envelope.into_page();
        debug!("fetched page {} ({} of {:?})", query.page, page.items.len(), page.total);
        Ok(page)
    }

    async fn get(&self, id: i64) -> Result<Task, RemoteError> {
        let url = self.url(&format!("chores/{}", id))?;
        self.send(self.request(Method::GET, url)).await?.into_task()
    }

    async fn create(&self, draft: &TaskDraft) -> Result<Task, RemoteError> {
        let url = self.url("chores")?;
        self.send(self.request(Method::POST, url).json(draft))
            .await?
            .into_task()
    }

    async fn update(&self, id: i64, draft: &TaskDraft) -> Result<Task, RemoteError> {
        let url = self.url(&format!("chores/{}", id))?;
        self.send(self.request(Method::PUT, url).json(draft))
            .await?
            .into_task()
    }

    async fn delete(&self, id: i64) -> Result<(), RemoteError> {
        let url = self.url(&format!("chores/{}", id))?;
        self.send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }
}

async fn read_session(response: reqwest::Response) -> Result<AuthSession, RemoteError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(RemoteError::from_status(status.as_u16(), api_message(&body)));
    }
    serde_json::from_str(&body).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
}

fn api_message(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<dto::ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }
    body.trim().chars().take(180).collect()
}
