//! BI Platform Collaborators
//!
//! The assistant consumes the platform as four narrow services. Each is a
//! trait so the pipeline can run against the REST client or an in-memory
//! double.

pub mod looker;

pub use looker::{LookerClient, LookerConfig};

use crate::error::Result;
use crate::query::QueryBody;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A model as listed by the platform, with its explores.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelListing {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub explores: Vec<ExploreListing>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExploreListing {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub hidden: Option<bool>,
}

/// Field as described by the platform, before hidden fields are removed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformField {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExploreFields {
    #[serde(default)]
    pub dimensions: Vec<PlatformField>,
    #[serde(default)]
    pub measures: Vec<PlatformField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedQuery {
    pub id: String,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardElement {
    #[serde(default)]
    pub id: Option<String>,
    pub dashboard_id: String,
    pub query_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPlanRequest {
    pub query_id: String,
    pub title: String,
    pub email: String,
    pub format: String,
    pub crontab: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPlan {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub crontab: Option<String>,
}

/// Semantic-model discovery.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelListing>>;

    async fn describe_explore(&self, model: &str, explore: &str) -> Result<ExploreFields>;
}

/// Query creation and execution.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn create_query(&self, body: &QueryBody) -> Result<CreatedQuery>;

    /// Run a saved query, returning the result rendered in `format` (e.g. `md`).
    async fn run_query(&self, query_id: &str, format: &str) -> Result<String>;
}

#[async_trait]
pub trait DashboardService: Send + Sync {
    async fn list_dashboards(&self) -> Result<Vec<DashboardSummary>>;

    async fn create_dashboard(&self, title: &str) -> Result<DashboardSummary>;

    async fn add_tile(
        &self,
        dashboard_id: &str,
        query_id: &str,
        title: &str,
    ) -> Result<DashboardElement>;
}

#[async_trait]
pub trait SchedulingService: Send + Sync {
    async fn create_scheduled_plan(&self, request: &ScheduledPlanRequest) -> Result<ScheduledPlan>;
}

/// Everything the pipeline needs from the platform.
pub trait BiPlatform: SchemaSource + QueryService + DashboardService + SchedulingService {}

impl<T> BiPlatform for T where T: SchemaSource + QueryService + DashboardService + SchedulingService {}
