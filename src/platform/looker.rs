//! Looker REST Client
//!
//! Implements the platform services against the Looker API 4.0.
//! Authentication is client-credentials login; the access token is cached
//! until shortly before it expires.

use crate::error::{AssistantError, Result};
use crate::platform::{
    CreatedQuery, DashboardElement, DashboardService, DashboardSummary, ExploreFields,
    ModelListing, QueryService, ScheduledPlan, ScheduledPlanRequest, SchedulingService,
    SchemaSource,
};
use crate::query::QueryBody;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

const API_PREFIX: &str = "/api/4.0";
const SERVICE: &str = "looker";

#[derive(Debug, Clone)]
pub struct LookerConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout_secs: u64,
}

impl LookerConfig {
    /// Read `LOOKER_BASE_URL`, `LOOKER_CLIENT_ID`, `LOOKER_CLIENT_SECRET`
    /// and optionally `LOOKER_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let required = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AssistantError::Config(format!("{} is not set", key)))
        };
        let timeout_secs = std::env::var("LOOKER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);
        Ok(Self {
            base_url: required("LOOKER_BASE_URL")?,
            client_id: required("LOOKER_CLIENT_ID")?,
            client_secret: required("LOOKER_CLIENT_SECRET")?,
            timeout_secs,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct AccessToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct ExploreResponse {
    #[serde(default)]
    fields: Option<ExploreFields>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    crontab: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    #[serde(default)]
    personal_folder_id: Value,
}

/// Looker ids arrive as strings in API 4.0 but as numbers on older instances.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct LookerClient {
    config: LookerConfig,
    client: Client,
    token: Mutex<Option<AccessToken>>,
}

impl LookerClient {
    pub fn new(config: LookerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            config: LookerConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            client,
            token: Mutex::new(None),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(LookerConfig::from_env()?)
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.config.base_url, API_PREFIX, path)
    }

    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        debug!("Logging in to Looker at {}", self.config.base_url);
        let response = self
            .client
            .post(self.url("/login"))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;
        let login: LoginResponse = Self::check(response).await?.json().await?;

        // Refresh a minute early so in-flight calls never carry a stale token
        let ttl = login.expires_in.unwrap_or(3600).saturating_sub(60);
        let token = login.access_token.clone();
        *guard = Some(AccessToken {
            token: login.access_token,
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        Ok(token)
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.access_token().await?;
        Ok(self
            .client
            .request(method, self.url(path))
            .header("Authorization", format!("token {}", token)))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(AssistantError::Api {
            service: SERVICE.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self.request(Method::GET, path).await?.query(query).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let response = self.request(Method::POST, path).await?.json(body).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn personal_folder_id(&self) -> Result<Option<String>> {
        let me: MeResponse = self
            .get_json("/user", &[("fields", "personal_folder_id")])
            .await?;
        Ok(id_string(&me.personal_folder_id))
    }
}

#[async_trait]
impl SchemaSource for LookerClient {
    async fn list_models(&self) -> Result<Vec<ModelListing>> {
        self.get_json("/lookml_models", &[("fields", "name,explores")])
            .await
    }

    async fn describe_explore(&self, model: &str, explore: &str) -> Result<ExploreFields> {
        let path = format!("/lookml_models/{}/explores/{}", model, explore);
        let response: ExploreResponse = self.get_json(&path, &[("fields", "fields")]).await?;
        Ok(response.fields.unwrap_or_default())
    }
}

#[async_trait]
impl QueryService for LookerClient {
    async fn create_query(&self, body: &QueryBody) -> Result<CreatedQuery> {
        info!("Creating query on {}:{}", body.model, body.view);
        let created: IdResponse = self.post_json("/queries", &serde_json::to_value(body)?).await?;
        let id = id_string(&created.id).ok_or_else(|| AssistantError::Api {
            service: SERVICE.to_string(),
            status: 200,
            message: "Query was created without an id".to_string(),
        })?;
        Ok(CreatedQuery {
            id,
            client_id: created.client_id,
        })
    }

    async fn run_query(&self, query_id: &str, format: &str) -> Result<String> {
        let path = format!("/queries/{}/run/{}", query_id, format);
        let response = self.request(Method::GET, &path).await?.send().await?;
        Ok(Self::check(response).await?.text().await?)
    }
}

#[async_trait]
impl DashboardService for LookerClient {
    async fn list_dashboards(&self) -> Result<Vec<DashboardSummary>> {
        let dashboards: Vec<IdResponse> =
            self.get_json("/dashboards", &[("fields", "id,title")]).await?;
        Ok(dashboards
            .into_iter()
            .filter_map(|d| {
                Some(DashboardSummary {
                    id: id_string(&d.id)?,
                    title: d.title.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn create_dashboard(&self, title: &str) -> Result<DashboardSummary> {
        let folder_id = self.personal_folder_id().await?;
        let created: IdResponse = self
            .post_json(
                "/dashboards",
                &json!({ "title": title, "description": "", "folder_id": folder_id }),
            )
            .await?;
        let id = id_string(&created.id).ok_or_else(|| AssistantError::Api {
            service: SERVICE.to_string(),
            status: 200,
            message: "Dashboard was created without an id".to_string(),
        })?;
        Ok(DashboardSummary {
            id,
            title: created.title.unwrap_or_else(|| title.to_string()),
        })
    }

    async fn add_tile(
        &self,
        dashboard_id: &str,
        query_id: &str,
        title: &str,
    ) -> Result<DashboardElement> {
        let created: IdResponse = self
            .post_json(
                "/dashboard_elements",
                &json!({
                    "dashboard_id": dashboard_id,
                    "query_id": query_id,
                    "title": title,
                    "type": "vis",
                }),
            )
            .await?;
        Ok(DashboardElement {
            id: id_string(&created.id),
            dashboard_id: dashboard_id.to_string(),
            query_id: query_id.to_string(),
            title: created.title.or_else(|| Some(title.to_string())),
        })
    }
}

#[async_trait]
impl SchedulingService for LookerClient {
    async fn create_scheduled_plan(&self, request: &ScheduledPlanRequest) -> Result<ScheduledPlan> {
        let created: IdResponse = self
            .post_json(
                "/scheduled_plans",
                &json!({
                    "name": request.title,
                    "query_id": request.query_id,
                    "scheduled_plan_destination": [{
                        "format": request.format,
                        "type": "email",
                        "address": request.email,
                    }],
                    "crontab": request.crontab,
                    "run_once": false,
                }),
            )
            .await?;
        Ok(ScheduledPlan {
            id: id_string(&created.id),
            name: created.name.unwrap_or_else(|| request.title.clone()),
            crontab: created.crontab.or_else(|| Some(request.crontab.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_string_accepts_strings_and_numbers() {
        assert_eq!(id_string(&json!("42")), Some("42".to_string()));
        assert_eq!(id_string(&json!(42)), Some("42".to_string()));
        assert_eq!(id_string(&json!(null)), None);
        assert_eq!(id_string(&json!("")), None);
    }

    #[test]
    fn test_urls_are_rooted_at_api_prefix() {
        let client = LookerClient::new(LookerConfig {
            base_url: "https://example.looker.com:19999/".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(
            client.url("/lookml_models"),
            "https://example.looker.com:19999/api/4.0/lookml_models"
        );
    }

    #[test]
    fn test_explore_response_tolerates_missing_fields() {
        let response: ExploreResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.fields.is_none());
        let response: ExploreResponse = serde_json::from_value(json!({
            "fields": {"dimensions": [{"name": "orders.status", "type": "string", "hidden": false}]}
        }))
        .unwrap();
        let fields = response.fields.unwrap();
        assert_eq!(fields.dimensions.len(), 1);
        assert!(fields.measures.is_empty());
    }
}
