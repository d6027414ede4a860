//! Explore Query Specification
//!
//! `ExploreParams` is the executable query produced for each turn. Model
//! output is merged into it leniently: anything with the wrong shape is
//! skipped rather than failing the turn. Membership of fields, filters and
//! sorts is enforced separately by `field_validator`.

use crate::error::{AssistantError, Result};
use crate::semantic::ExploreRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const DEFAULT_LIMIT: &str = "500";

/// Chart types the host can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VisType {
    #[serde(rename = "looker_column")]
    Column,
    #[serde(rename = "looker_bar")]
    Bar,
    #[serde(rename = "looker_line")]
    Line,
    #[serde(rename = "looker_pie")]
    Pie,
    #[serde(rename = "looker_area")]
    Area,
    #[serde(rename = "looker_scatter")]
    Scatter,
    #[serde(rename = "single_value")]
    SingleValue,
    #[default]
    #[serde(rename = "looker_grid")]
    Grid,
}

impl VisType {
    pub const ALL: [VisType; 8] = [
        VisType::Column,
        VisType::Bar,
        VisType::Line,
        VisType::Pie,
        VisType::Area,
        VisType::Scatter,
        VisType::SingleValue,
        VisType::Grid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VisType::Column => "looker_column",
            VisType::Bar => "looker_bar",
            VisType::Line => "looker_line",
            VisType::Pie => "looker_pie",
            VisType::Area => "looker_area",
            VisType::Scatter => "looker_scatter",
            VisType::SingleValue => "single_value",
            VisType::Grid => "looker_grid",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == tag)
    }

    /// Resolve a chart tag written by a model.
    ///
    /// Models regularly write `looker_single_value`; that one is corrected.
    /// Anything else outside the catalogue falls back to the grid.
    pub fn from_model_tag(tag: &str) -> Self {
        let tag = tag.trim();
        if tag == "looker_single_value" {
            debug!("Corrected chart type looker_single_value -> single_value");
            return VisType::SingleValue;
        }
        match Self::parse(tag) {
            Some(t) => t,
            None => {
                warn!("Unknown chart type '{}' from model, using looker_grid", tag);
                VisType::Grid
            }
        }
    }

    /// Comma-separated catalogue, as rendered into prompts.
    pub fn catalogue() -> String {
        Self::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Visualization configuration: a mandatory chart type plus free-form options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VisConfig {
    #[serde(rename = "type")]
    pub vis_type: VisType,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl VisConfig {
    pub fn new(vis_type: VisType) -> Self {
        Self {
            vis_type,
            options: Map::new(),
        }
    }

    /// Build from a model-written object. A missing or unknown `type` falls back to the grid.
    pub fn from_model_value(value: &Value) -> Self {
        let mut options = match value.as_object() {
            Some(obj) => obj.clone(),
            None => return Self::default(),
        };
        let vis_type = match options.remove("type") {
            Some(Value::String(tag)) => VisType::from_model_tag(&tag),
            _ => VisType::Grid,
        };
        Self { vis_type, options }
    }

    pub fn to_value(&self) -> Value {
        let mut obj = self.options.clone();
        obj.insert(
            "type".to_string(),
            Value::String(self.vis_type.as_str().to_string()),
        );
        Value::Object(obj)
    }
}

/// The executable query specification for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExploreParams {
    #[serde(default)]
    pub fields: Vec<String>,
    /// Field name -> filter expression; commas inside an expression mean OR
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    /// `"field"` or `"field direction"` tokens
    #[serde(default)]
    pub sorts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    #[serde(default)]
    pub pivots: Vec<String>,
    #[serde(default)]
    pub fill_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<bool>,
    #[serde(default)]
    pub vis_config: VisConfig,
}

/// Keys that identify the explore. They come from the session, never from a model.
const HOST_OWNED_KEYS: [&str; 2] = ["model", "view"];

impl ExploreParams {
    /// Merge a base-query object and the extracted filters into one specification.
    ///
    /// `model`/`view` keys are stripped, the extracted filters replace any
    /// filters the base query carried, and the chart tag is normalised.
    pub fn from_model_output(base: &Value, filters: BTreeMap<String, Vec<String>>) -> Self {
        let mut obj = base.as_object().cloned().unwrap_or_default();
        for key in HOST_OWNED_KEYS {
            if let Some(v) = obj.remove(key) {
                debug!("Stripped '{}' ({}) from model output", key, v);
            }
        }

        ExploreParams {
            fields: string_list(obj.get("fields")),
            filters: join_filter_values(filters),
            sorts: string_list(obj.get("sorts")),
            limit: scalar_string(obj.get("limit")),
            pivots: string_list(obj.get("pivots")),
            fill_fields: string_list(obj.get("fill_fields")),
            column_limit: scalar_string(obj.get("column_limit")),
            total: obj.get("total").and_then(Value::as_bool),
            vis_config: obj
                .get("vis_config")
                .map(VisConfig::from_model_value)
                .unwrap_or_default(),
        }
    }

    /// Copy of these params with only the visualization replaced.
    pub fn with_vis_config(&self, vis_config: VisConfig) -> Self {
        Self {
            vis_config,
            ..self.clone()
        }
    }

    /// Explore page URL for this query, as embedded by the host.
    pub fn explore_url(&self, base_url: &str, explore: &ExploreRef) -> Result<String> {
        let mut url = reqwest::Url::parse(base_url)
            .map_err(|e| AssistantError::Config(format!("Invalid base URL '{}': {}", base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| AssistantError::Config(format!("Base URL '{}' cannot carry a path", base_url)))?
            .pop_if_empty()
            .extend(["explore", explore.model_name.as_str(), explore.explore_id.as_str()]);
        {
            let mut pairs = url.query_pairs_mut();
            if !self.fields.is_empty() {
                pairs.append_pair("fields", &self.fields.join(","));
            }
            for (field, expression) in &self.filters {
                pairs.append_pair(&format!("f[{}]", field), expression);
            }
            if !self.sorts.is_empty() {
                pairs.append_pair("sorts", &self.sorts.join(","));
            }
            if !self.pivots.is_empty() {
                pairs.append_pair("pivots", &self.pivots.join(","));
            }
            if !self.fill_fields.is_empty() {
                pairs.append_pair("fill_fields", &self.fill_fields.join(","));
            }
            pairs.append_pair("limit", self.limit.as_deref().unwrap_or(DEFAULT_LIMIT));
            if let Some(column_limit) = &self.column_limit {
                pairs.append_pair("column_limit", column_limit);
            }
            pairs.append_pair("vis", &self.vis_config.to_value().to_string());
            pairs.append_pair("toggle", "vis,data");
        }
        Ok(url.to_string())
    }
}

/// Body for the platform's "create query" call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBody {
    pub model: String,
    pub view: String,
    pub fields: Vec<String>,
    pub filters: BTreeMap<String, String>,
    pub sorts: Vec<String>,
    pub limit: String,
    pub vis_config: Value,
    pub pivots: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub fill_fields: Vec<String>,
}

impl QueryBody {
    /// Explore identity comes from `explore`; empty filter values are dropped.
    pub fn new(explore: &ExploreRef, params: &ExploreParams) -> Self {
        let filters = params
            .filters
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            model: explore.model_name.clone(),
            view: explore.explore_id.clone(),
            fields: params.fields.clone(),
            filters,
            sorts: params.sorts.clone(),
            limit: params
                .limit
                .clone()
                .unwrap_or_else(|| DEFAULT_LIMIT.to_string()),
            vis_config: params.vis_config.to_value(),
            pivots: params.pivots.clone(),
            fill_fields: params.fill_fields.clone(),
        }
    }
}

/// Join each field's expressions with `,` (OR), dropping blanks and empty fields.
pub fn join_filter_values(filters: BTreeMap<String, Vec<String>>) -> BTreeMap<String, String> {
    filters
        .into_iter()
        .filter_map(|(field, expressions)| {
            let kept: Vec<String> = expressions
                .into_iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
            if kept.is_empty() {
                None
            } else {
                Some((field, kept.join(",")))
            }
        })
        .collect()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => {
            s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
        }
        _ => Vec::new(),
    }
}

fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}
