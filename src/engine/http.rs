use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::engine::types::*;
use crate::engine::{EngineClient, EngineResult};
use crate::error::EngineError;

/// Every engine response wraps its payload in `{"data": ...}`.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// REST client for the process engine.
pub struct HttpEngineClient {
    base_url: String,
    client: reqwest::Client,
    api_token: Option<String>,
}

impl HttpEngineClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        api_token: Option<String>,
    ) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            api_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> EngineResult<Url> {
        let raw = format!("{}{}", self.base_url, path);
        let mut url = Url::parse(&raw)
            .map_err(|e| EngineError::Request(format!("Invalid engine URL '{}': {}", raw, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> EngineResult<reqwest::Response> {
        let url = self.url(path, query)?;
        debug!(method = %method, url = %url, "Engine request");

        let mut request = self.client.request(method.clone(), url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            warn!(method = %method, path = %path, error = %e, "Engine unreachable");
            EngineError::Request(format!("{} {}: {}", method, path, e))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let detail = error_detail(&text);
        warn!(method = %method, path = %path, status = status.as_u16(), detail = %detail, "Engine rejected request");

        Err(match status {
            StatusCode::NOT_FOUND => EngineError::NotFound(detail),
            StatusCode::CONFLICT => EngineError::Conflict(detail),
            _ => EngineError::Request(format!("{} {} returned {}: {}", method, path, status, detail)),
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> EngineResult<T> {
        let response = self.send(method, path, query, body).await?;
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| EngineError::Request(format!("Malformed response from {}: {}", path, e)))?;
        Ok(envelope.data)
    }
}

/// Pull the engine's `detail` message out of an error body, falling back to
/// the raw text.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => match json.get("detail") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> EngineResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::Request(format!("Failed to encode request: {}", e)))
}

/// The engine takes start variables keyed by name: `{name: {type, value}}`.
fn start_body(request: &StartRequest) -> serde_json::Value {
    let variables: serde_json::Map<String, serde_json::Value> = request
        .variables
        .iter()
        .map(|v| {
            (
                v.name.clone(),
                serde_json::json!({ "type": v.type_tag, "value": v.value }),
            )
        })
        .collect();

    serde_json::json!({
        "definition_id": request.definition_id,
        "variables": variables,
    })
}

#[async_trait]
impl EngineClient for HttpEngineClient {
    async fn list_definitions(&self) -> EngineResult<Vec<ProcessDefinition>> {
        let page: Page<ProcessDefinition> = self.fetch(Method::GET, "/processes", &[], None).await?;
        Ok(page.items)
    }

    async fn get_definition(&self, id: &str) -> EngineResult<ProcessDefinition> {
        self.fetch(Method::GET, &format!("/processes/{}", id), &[], None)
            .await
    }

    async fn create_definition(&self, draft: &DefinitionDraft) -> EngineResult<ProcessDefinition> {
        self.fetch(Method::POST, "/processes", &[], Some(to_body(draft)?))
            .await
    }

    async fn update_definition(
        &self,
        id: &str,
        patch: &DefinitionPatch,
    ) -> EngineResult<ProcessDefinition> {
        self.fetch(
            Method::PUT,
            &format!("/processes/{}", id),
            &[],
            Some(to_body(patch)?),
        )
        .await
    }

    async fn delete_definition(&self, id: &str) -> EngineResult<()> {
        self.send(Method::DELETE, &format!("/processes/{}", id), &[], None)
            .await?;
        Ok(())
    }

    async fn list_versions(&self, definition_id: &str) -> EngineResult<Vec<DefinitionVersion>> {
        let list: VersionList = self
            .fetch(
                Method::GET,
                &format!("/versions/process/{}", definition_id),
                &[],
                None,
            )
            .await?;
        Ok(list.versions)
    }

    async fn restore_version(
        &self,
        version_id: &str,
        request: &RestoreRequest,
    ) -> EngineResult<DefinitionVersion> {
        self.fetch(
            Method::POST,
            &format!("/versions/restore/{}", version_id),
            &[],
            Some(to_body(request)?),
        )
        .await
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> EngineResult<Page<InstanceRecord>> {
        self.fetch(Method::GET, "/instances", &filter.query_pairs(), None)
            .await
    }

    async fn get_instance(&self, id: &str) -> EngineResult<InstanceRecord> {
        self.fetch(Method::GET, &format!("/instances/{}", id), &[], None)
            .await
    }

    async fn start_instance(&self, request: &StartRequest) -> EngineResult<InstanceRecord> {
        self.fetch(Method::POST, "/instances", &[], Some(start_body(request)))
            .await
    }

    async fn suspend_instance(&self, id: &str) -> EngineResult<()> {
        self.send(Method::POST, &format!("/instances/{}/suspend", id), &[], None)
            .await?;
        Ok(())
    }

    async fn resume_instance(&self, id: &str) -> EngineResult<()> {
        self.send(Method::POST, &format!("/instances/{}/resume", id), &[], None)
            .await?;
        Ok(())
    }

    async fn get_instance_tokens(&self, id: &str) -> EngineResult<Vec<TokenPosition>> {
        self.fetch(Method::GET, &format!("/instances/{}/tokens", id), &[], None)
            .await
    }

    async fn get_stats(&self) -> EngineResult<ProcessStats> {
        self.fetch(Method::GET, "/stats", &[], None).await
    }
}
