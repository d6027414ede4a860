//! Explore Assistant
//!
//! Turns natural-language questions into validated BI explore queries:
//! schema discovery, grounded prompt composition, LLM completion, lenient
//! response parsing, and validation of every generated field, filter and
//! sort against the live semantic model.

pub mod config;
pub mod error;
pub mod field_validator;
pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod platform;
pub mod prompts;
pub mod query;
pub mod response_parser;
pub mod semantic;
pub mod session;

pub use config::{AppConfig, AttributeSource, EnvAttributes, LlmSettings, LocalSettings};
pub use error::{AssistantError, Result};
pub use intent::{Intent, IntentClassification};
pub use llm::{CompletionService, LlmClient, LlmProvider};
pub use pipeline::{Orchestrator, TurnOutcome};
pub use platform::{BiPlatform, LookerClient, LookerConfig};
pub use query::{ExploreParams, VisConfig, VisType};
pub use semantic::{ExploreRef, Field, SchemaDirectory, SemanticModel};
pub use session::{Message, MessageKind, Session};
