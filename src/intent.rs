//! Intent classification result
//!
//! Decoded leniently from parsed model output: an absent or unrecognised
//! intent means `explore`, malformed metadata is ignored field by field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Summary,
    Dashboard,
    Schedule,
    Refine,
    #[default]
    Explore,
}

impl Intent {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "summary" => Some(Intent::Summary),
            "dashboard" => Some(Intent::Dashboard),
            "schedule" => Some(Intent::Schedule),
            "refine" => Some(Intent::Refine),
            "explore" => Some(Intent::Explore),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::Summary => "summary",
            Intent::Dashboard => "dashboard",
            Intent::Schedule => "schedule",
            Intent::Refine => "refine",
            Intent::Explore => "explore",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardAction {
    Create,
    Add,
}

/// How often a scheduled delivery runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// Unknown or absent frequencies run daily.
    pub fn parse(tag: Option<&str>) -> Self {
        match tag.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
            Some("hourly") => Frequency::Hourly,
            Some("weekly") => Frequency::Weekly,
            Some("monthly") => Frequency::Monthly,
            _ => Frequency::Daily,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }

    pub fn crontab(&self) -> &'static str {
        match self {
            Frequency::Hourly => "0 * * * *",
            Frequency::Daily => "0 6 * * *",
            Frequency::Weekly => "0 6 * * 1",
            Frequency::Monthly => "0 6 1 * *",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntentMeta {
    pub title: Option<String>,
    pub action: Option<DashboardAction>,
    pub email: Option<String>,
    pub frequency: Option<String>,
}

/// Classification of one user turn. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Intent,
    pub meta: IntentMeta,
}

impl IntentClassification {
    pub fn from_value(value: &Value) -> Self {
        let intent = value
            .get("intent")
            .and_then(Value::as_str)
            .and_then(Intent::parse)
            .unwrap_or_default();

        let meta = value.get("meta");
        let text = |key: &str| {
            meta.and_then(|m| m.get(key))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let action = match text("action").map(|a| a.to_ascii_lowercase()).as_deref() {
            Some("create") => Some(DashboardAction::Create),
            Some("add") => Some(DashboardAction::Add),
            _ => None,
        };

        Self {
            intent,
            meta: IntentMeta {
                title: text("title"),
                action,
                email: text("email"),
                frequency: text("frequency"),
            },
        }
    }

    pub fn frequency(&self) -> Frequency {
        Frequency::parse(self.meta.frequency.as_deref())
    }
}
