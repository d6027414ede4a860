//! Intent actions: dashboard, schedule, refine and data summary.
//!
//! Missing metadata is never guessed. The action stops with a clarification
//! message and leaves the thread's query untouched.

use super::Orchestrator;
use crate::error::{AssistantError, Result};
use crate::intent::{DashboardAction, IntentClassification};
use crate::platform::ScheduledPlanRequest;
use crate::prompts;
use crate::query::{ExploreParams, QueryBody, VisConfig};
use crate::response_parser::{is_empty_structure, parse_json};
use crate::semantic::{ExploreRef, SemanticModel};
use crate::session::{Message, Session};
use tracing::info;

const DEFAULT_DASHBOARD_TITLE: &str = "New Dashboard";
const DEFAULT_TILE_TITLE: &str = "New Tile";
const SCHEDULE_TITLE: &str = "Scheduled Report";
const SCHEDULE_FORMAT: &str = "csv_zip";
const SUMMARY_FORMAT: &str = "md";

pub const MISSING_DASHBOARD_TITLE: &str =
    "Please specify the name of the dashboard you want to add this tile to.";
pub const MISSING_EMAIL: &str = "Please provide an email address to schedule the report.";
pub const NOTHING_TO_REFINE: &str = "I can't refine the visualization because there isn't one in the previous turn. Please ask a new question.";
pub const REFINE_FAILED: &str =
    "I couldn't update the visualization from that request. Please try rephrasing the change.";
pub const REFINED_PROMPT: &str = "Visualization updated";

impl Orchestrator {
    /// The thread's latest query, or a fresh one generated from the summary.
    async fn query_for_action(
        &self,
        session: &Session,
        summary: &str,
        model: &SemanticModel,
    ) -> Result<ExploreParams> {
        match &session.thread().explore_params {
            Some(params) => Ok(params.clone()),
            None => self.generate_explore_params(summary, model).await,
        }
    }

    async fn create_query(&self, explore: &ExploreRef, params: &ExploreParams) -> Result<String> {
        let created = self
            .platform
            .create_query(&QueryBody::new(explore, params))
            .await?;
        Ok(created.id)
    }

    pub(super) async fn handle_dashboard(
        &self,
        session: &mut Session,
        classification: &IntentClassification,
        summary: &str,
        explore: &ExploreRef,
        model: &SemanticModel,
    ) -> Result<()> {
        let meta = &classification.meta;
        info!("Dashboard intent: title={:?} action={:?}", meta.title, meta.action);

        if meta.action == Some(DashboardAction::Create) {
            let title = meta.title.as_deref().unwrap_or(DEFAULT_DASHBOARD_TITLE);
            let params = self.query_for_action(session, summary, model).await?;
            let dashboard = self.platform.create_dashboard(title).await?;
            let query_id = self.create_query(explore, &params).await?;
            self.platform
                .add_tile(
                    &dashboard.id,
                    &query_id,
                    meta.title.as_deref().unwrap_or(DEFAULT_TILE_TITLE),
                )
                .await?;
            session.push_message(Message::system(format!(
                "Created new dashboard \"[{}](/dashboards/{})\" and added tile.",
                title, dashboard.id
            )));
            return Ok(());
        }

        let Some(title) = meta.title.as_deref() else {
            session.push_message(Message::system(MISSING_DASHBOARD_TITLE));
            return Ok(());
        };

        let dashboards = self.platform.list_dashboards().await?;
        let wanted = title.to_lowercase();
        match dashboards.into_iter().find(|d| d.title.to_lowercase() == wanted) {
            Some(dashboard) => {
                let params = self.query_for_action(session, summary, model).await?;
                let query_id = self.create_query(explore, &params).await?;
                self.platform
                    .add_tile(&dashboard.id, &query_id, DEFAULT_TILE_TITLE)
                    .await?;
                session.push_message(Message::system(format!(
                    "Added tile to dashboard \"[{}](/dashboards/{})\".",
                    dashboard.title, dashboard.id
                )));
            }
            None => {
                session.push_message(Message::system(format!(
                    "Could not find dashboard \"{}\".",
                    title
                )));
            }
        }
        Ok(())
    }

    pub(super) async fn handle_schedule(
        &self,
        session: &mut Session,
        classification: &IntentClassification,
        summary: &str,
        explore: &ExploreRef,
        model: &SemanticModel,
    ) -> Result<()> {
        let Some(email) = classification.meta.email.clone() else {
            session.push_message(Message::system(MISSING_EMAIL));
            return Ok(());
        };

        let frequency = classification.frequency();
        let params = self.query_for_action(session, summary, model).await?;
        let query_id = self.create_query(explore, &params).await?;
        let plan = self
            .platform
            .create_scheduled_plan(&ScheduledPlanRequest {
                query_id,
                title: SCHEDULE_TITLE.to_string(),
                email: email.clone(),
                format: SCHEDULE_FORMAT.to_string(),
                crontab: frequency.crontab().to_string(),
            })
            .await?;
        info!("Created scheduled plan {:?} for {}", plan.id, email);

        session.push_message(Message::system(format!(
            "Scheduled report to {} ({}).",
            email,
            frequency.as_str()
        )));
        Ok(())
    }

    /// Regenerate only the visualization of the previous turn's query.
    pub(super) async fn handle_refine(
        &self,
        session: &mut Session,
        text: &str,
        explore: &ExploreRef,
        model: &SemanticModel,
    ) -> Result<()> {
        let previous = session
            .thread()
            .previous_message()
            .and_then(|m| m.explore_params())
            .cloned();
        let Some(params) = previous else {
            session.push_message(Message::system(NOTHING_TO_REFINE));
            return Ok(());
        };

        let prompt = prompts::build_refine_prompt(text, &params.vis_config, &params, model);
        let response = parse_json(&self.llm.complete(&prompt).await?);
        if !response.is_object() || is_empty_structure(&response) {
            session.push_message(Message::system(REFINE_FAILED));
            return Ok(());
        }

        let refined = params.with_vis_config(VisConfig::from_model_value(&response));
        session.push_message(Message::explore(&explore.explore_key, refined, REFINED_PROMPT));
        Ok(())
    }

    /// Run the query, summarise its data, then condense the summary into slides.
    pub async fn summarize_explore(
        &self,
        explore: &ExploreRef,
        params: &ExploreParams,
    ) -> Result<String> {
        let query_id = self.create_query(explore, params).await?;
        let data = self.platform.run_query(&query_id, SUMMARY_FORMAT).await?;
        if data.trim().is_empty() {
            return Err(AssistantError::Precondition(
                "The query returned no data to summarize".to_string(),
            ));
        }

        let summary = self
            .llm
            .complete(&prompts::build_summary_prompt(&data))
            .await?;
        let slides = self
            .llm
            .complete(&prompts::build_slide_prompt(&summary))
            .await?;
        Ok(slides)
    }
}
