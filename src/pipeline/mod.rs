//! Orchestration Pipeline
//!
//! Per user turn: summarise the prompt history and classify the latest
//! prompt concurrently, check the explore's schema is loaded, then either
//! run an action (dashboard, schedule, refine) or build a fresh query from
//! two independent generations (filters, base query) that are merged and
//! validated against the live lexicon.
//!
//! Failures end the turn with an `Error: ...` message in the thread; the
//! in-flight flag is always cleared.

mod actions;

pub use actions::{MISSING_DASHBOARD_TITLE, MISSING_EMAIL, NOTHING_TO_REFINE, REFINED_PROMPT, REFINE_FAILED};

use crate::error::{AssistantError, Result};
use crate::field_validator::{ExploreValidator, FilterCandidate};
use crate::intent::{Intent, IntentClassification};
use crate::llm::CompletionService;
use crate::platform::BiPlatform;
use crate::prompts::{self, ExampleLibrary, RefinementExample};
use crate::query::ExploreParams;
use crate::response_parser::parse_json;
use crate::semantic::{ExploreRef, SchemaDirectory, SemanticModel};
use crate::session::{Message, Session};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const NOT_READY_MESSAGE: &str = "The semantic model for this explore is not loaded yet. Please wait a moment and try again, or select a different explore.";
pub const NO_SUMMARY_MESSAGE: &str = "I couldn't work out a question from this conversation. Please rephrase it.";

/// What one turn added to the thread.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// `None` when the turn failed before classification finished
    pub intent: Option<Intent>,
    pub summarized_prompt: String,
    pub messages: Vec<Message>,
    /// Latest query produced by this turn, if any
    pub explore_params: Option<ExploreParams>,
    pub explore_url: Option<String>,
}

pub struct Orchestrator {
    llm: Arc<dyn CompletionService>,
    platform: Arc<dyn BiPlatform>,
    directory: Arc<SchemaDirectory>,
    examples: ExampleLibrary,
    base_url: Option<String>,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn CompletionService>,
        platform: Arc<dyn BiPlatform>,
        directory: Arc<SchemaDirectory>,
        examples: ExampleLibrary,
    ) -> Self {
        Self {
            llm,
            platform,
            directory,
            examples,
            base_url: None,
        }
    }

    /// Host base URL used to render explore links for produced queries.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn directory(&self) -> &SchemaDirectory {
        &self.directory
    }

    /// Discover explores, pick a default and load the current explore's schema.
    /// Other explores load when they are first used.
    pub async fn initialize(&self, session: &mut Session) -> Result<Vec<ExploreRef>> {
        let explores = self.directory.discover_explores().await?;
        session.set_available_explores(explores.clone());
        self.load_current(session).await;
        Ok(explores)
    }

    /// Load the current explore's schema if it is not cached yet. Fail-soft.
    pub async fn load_current(&self, session: &Session) -> Option<Arc<SemanticModel>> {
        let explore = session.current_explore()?.clone();
        self.directory.get_or_load(&explore).await
    }

    /// Run one user turn against the session.
    ///
    /// Only a second concurrent turn is an `Err`; every other failure is
    /// reported as a message in the thread.
    pub async fn submit(&self, session: &mut Session, text: &str) -> Result<TurnOutcome> {
        let text = text.trim();
        session.begin_turn(text)?;
        let start = session.thread().messages.len();

        let intent = match self.run_turn(session, text).await {
            Ok(intent) => Some(intent),
            Err(e) => {
                error!("Turn failed: {}", e);
                session.push_message(Message::system(format!("Error: {}", e)));
                None
            }
        };
        session.end_turn();

        let messages = session.thread().messages[start..].to_vec();
        let explore_params = messages
            .iter()
            .rev()
            .find_map(|m| m.query_params().cloned());
        let explore_url = match (&self.base_url, &explore_params, session.current_explore()) {
            (Some(base_url), Some(params), Some(explore)) => params
                .explore_url(base_url, explore)
                .map_err(|e| warn!("Could not build explore URL: {}", e))
                .ok(),
            _ => None,
        };

        Ok(TurnOutcome {
            intent,
            summarized_prompt: session.thread().summarized_prompt.clone(),
            messages,
            explore_params,
            explore_url,
        })
    }

    async fn run_turn(&self, session: &mut Session, text: &str) -> Result<Intent> {
        let explore = session
            .current_explore()
            .cloned()
            .ok_or_else(|| AssistantError::Precondition("No explore is selected".to_string()))?;
        let prompt_list = session.thread().prompt_list.clone();

        let (summary, classification) = tokio::join!(
            self.summarize_prompts(&prompt_list, self.examples.refinement(&explore.explore_key)),
            self.classify_intent(text),
        );
        let summary = summary?;
        let classification = classification?;
        let intent = classification.intent;
        info!("Intent: {} | Summarized prompt: {}", intent, summary);

        if summary.is_empty() {
            session.push_message(Message::system(NO_SUMMARY_MESSAGE));
            return Ok(intent);
        }
        session.thread_mut().summarized_prompt = summary.clone();

        let model = match self.directory.ensure_loaded(&explore).await? {
            Some(model) => model,
            None => {
                warn!("Semantic model not loaded for explore {}", explore.explore_key);
                session.push_message(Message::system(NOT_READY_MESSAGE));
                return Ok(intent);
            }
        };

        match intent {
            Intent::Dashboard => {
                self.handle_dashboard(session, &classification, &summary, &explore, &model)
                    .await?
            }
            Intent::Schedule => {
                self.handle_schedule(session, &classification, &summary, &explore, &model)
                    .await?
            }
            Intent::Refine => self.handle_refine(session, text, &explore, &model).await?,
            Intent::Explore => {
                let params = self.generate_explore_params(&summary, &model).await?;
                session.push_message(Message::explore(&explore.explore_key, params, &summary));
            }
            Intent::Summary => {
                let params = self.generate_explore_params(&summary, &model).await?;
                let slides = self.summarize_explore(&explore, &params).await?;
                session.push_message(Message::summary(&explore.explore_key, params, &slides));
            }
        }
        Ok(intent)
    }

    /// Collapse the running prompt history into one question, latest statement winning.
    pub async fn summarize_prompts(
        &self,
        prompt_list: &[String],
        examples: &[RefinementExample],
    ) -> Result<String> {
        let prompt = prompts::build_prompt_summary_prompt(prompt_list, examples);
        let response = self.llm.complete(&prompt).await?;
        Ok(response.trim().trim_matches('"').trim().to_string())
    }

    pub async fn classify_intent(&self, text: &str) -> Result<IntentClassification> {
        let response = self.llm.complete(&prompts::build_intent_prompt(text)).await?;
        Ok(IntentClassification::from_value(&parse_json(&response)))
    }

    /// Filters and base query are generated concurrently from the same
    /// context, merged, and validated against the explore's lexicon.
    pub async fn generate_explore_params(
        &self,
        question: &str,
        model: &SemanticModel,
    ) -> Result<ExploreParams> {
        let context =
            prompts::build_shared_context(model, self.examples.generation(&model.explore_key))?;
        let now = Utc::now();
        let filter_prompt = prompts::build_filter_prompt(question, &context);
        let base_prompt = prompts::build_base_query_prompt(question, &context, &now);

        let (filter_response, base_response) = tokio::join!(
            self.llm.complete(&filter_prompt),
            self.llm.complete(&base_prompt),
        );

        let validator = ExploreValidator::new(model);
        let candidates = FilterCandidate::from_model_value(&parse_json(&filter_response?));
        let (filters, _) = validator.validate_filters(&candidates);
        let base = parse_json(&base_response?);

        let merged = ExploreParams::from_model_output(&base, filters);
        let (params, result) = validator.validate(merged);
        if !result.is_valid {
            info!(
                "Dropped {} invalid entries from generated query",
                result.warnings.len()
            );
        }
        Ok(params)
    }

    /// Free-form pass-through, prefixed with the current date.
    pub async fn send_raw(&self, prompt: &str) -> Result<String> {
        let wrapped = prompts::with_current_date(prompt, &Utc::now());
        self.llm.complete(&wrapped).await
    }
}
