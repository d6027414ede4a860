//! Semantic Model Definitions
//!
//! Fields, explores and the per-explore semantic model discovered from the
//! BI platform.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Filter grammar class of a field, derived from its semantic type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Number,
    Date,
    YesNo,
    Unknown,
}

impl FieldType {
    /// Classify a raw type tag such as `string`, `count`, `date_month` or `yesno`.
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim().to_ascii_lowercase();
        match tag.as_str() {
            "string" | "zipcode" | "tier" | "bin" | "list" => FieldType::String,
            // Timeframes that render as names rather than points in time
            "date_day_of_week" | "date_month_name" | "date_quarter_of_year"
            | "date_fiscal_quarter_of_year" => FieldType::String,
            // Timeframes that render as ordinals
            "date_day_of_month" | "date_day_of_year" | "date_hour_of_day" | "date_month_num"
            | "date_week_of_year" | "date_day_of_week_index" | "date_fiscal_month_num" => {
                FieldType::Number
            }
            "number" | "int" | "count" | "count_distinct" | "sum" | "sum_distinct" | "average"
            | "average_distinct" | "min" | "max" | "median" | "median_distinct" | "percentile"
            | "percentile_distinct" | "percent_of_total" | "percent_of_previous"
            | "running_total" => FieldType::Number,
            "date" | "time" | "datetime" | "timestamp" => FieldType::Date,
            "yesno" => FieldType::YesNo,
            t if t.starts_with("date_") => FieldType::Date,
            t if t.starts_with("duration_") => FieldType::Number,
            _ => FieldType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::YesNo => "yesno",
            FieldType::Unknown => "unknown",
        }
    }
}

/// A dimension or measure exposed by an explore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Dotted `view.field` name, unique within its explore
    pub name: String,
    /// Semantic type tag as reported by the platform (e.g. `date_month`, `sum`)
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            label: String::new(),
            description: String::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn filter_class(&self) -> FieldType {
        FieldType::from_tag(&self.field_type)
    }
}

/// A queryable explore, identified by `model:explore`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExploreRef {
    pub model_name: String,
    pub explore_id: String,
    pub explore_key: String,
    pub label: String,
}

impl ExploreRef {
    pub fn new(model_name: impl Into<String>, explore_id: impl Into<String>) -> Self {
        let model_name = model_name.into();
        let explore_id = explore_id.into();
        Self {
            explore_key: explore_key(&model_name, &explore_id),
            label: explore_id.clone(),
            model_name,
            explore_id,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Parse a `model:explore` key.
    pub fn from_key(key: &str) -> Option<Self> {
        let (model, explore) = key.split_once(':')?;
        if model.is_empty() || explore.is_empty() {
            return None;
        }
        Some(Self::new(model, explore))
    }
}

pub fn explore_key(model_name: &str, explore_id: &str) -> String {
    format!("{}:{}", model_name, explore_id)
}

/// Dimensions and measures available within one explore.
///
/// Immutable once loaded; a reload replaces the whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticModel {
    pub model_name: String,
    pub explore_id: String,
    pub explore_key: String,
    pub dimensions: Vec<Field>,
    pub measures: Vec<Field>,
}

impl SemanticModel {
    pub fn new(explore: &ExploreRef, dimensions: Vec<Field>, measures: Vec<Field>) -> Self {
        Self {
            model_name: explore.model_name.clone(),
            explore_id: explore.explore_id.clone(),
            explore_key: explore.explore_key.clone(),
            dimensions,
            measures,
        }
    }

    pub fn explore(&self) -> ExploreRef {
        ExploreRef::new(&self.model_name, &self.explore_id)
    }

    /// Both dimension and measure catalogues are non-empty.
    pub fn is_ready(&self) -> bool {
        !self.dimensions.is_empty() && !self.measures.is_empty()
    }

    /// Dimension + measure names: the lexicon every emitted field must belong to.
    pub fn field_names(&self) -> HashSet<String> {
        self.dimensions
            .iter()
            .chain(self.measures.iter())
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.dimensions
            .iter()
            .chain(self.measures.iter())
            .find(|f| f.name == name)
    }

    pub fn is_dimension(&self, name: &str) -> bool {
        self.dimensions.iter().any(|f| f.name == name)
    }

    pub fn is_measure(&self, name: &str) -> bool {
        self.measures.iter().any(|f| f.name == name)
    }
}
