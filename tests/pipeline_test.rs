// End-to-end turns through the orchestrator with in-memory collaborators.

use async_trait::async_trait;
use explore_assistant::error::{AssistantError, Result};
use explore_assistant::pipeline::{
    MISSING_DASHBOARD_TITLE, MISSING_EMAIL, NOTHING_TO_REFINE, NOT_READY_MESSAGE,
    NO_SUMMARY_MESSAGE, REFINED_PROMPT,
};
use explore_assistant::platform::{
    CreatedQuery, DashboardElement, DashboardService, DashboardSummary, ExploreFields,
    ExploreListing, ModelListing, PlatformField, QueryService, ScheduledPlan,
    ScheduledPlanRequest, SchedulingService, SchemaSource,
};
use explore_assistant::prompts::ExampleLibrary;
use explore_assistant::query::{QueryBody, VisType};
use explore_assistant::session::MessageKind;
use explore_assistant::{CompletionService, Intent, Orchestrator, SchemaDirectory, Session};
use pretty_assertions::assert_eq;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Stage {
    Refine,
    Slides,
    DataSummary,
    Filters,
    BaseQuery,
    PromptSummary,
    Intent,
}

impl Stage {
    fn of(prompt: &str) -> Stage {
        let markers = [
            ("expert in visualization configuration", Stage::Refine),
            ("slide presentation", Stage::Slides),
            ("Summarize the data above", Stage::DataSummary),
            ("Follow the steps below and generate a JSON list", Stage::Filters),
            ("DO NOT add a model or a view", Stage::BaseQuery),
            ("Conversation so far", Stage::PromptSummary),
            ("determine the user's intent", Stage::Intent),
        ];
        markers
            .iter()
            .find(|(marker, _)| prompt.contains(marker))
            .map(|(_, stage)| *stage)
            .unwrap_or_else(|| panic!("unrouted prompt: {}", prompt))
    }
}

/// Replies per stage in order; the last reply of a stage repeats.
#[derive(Default)]
struct ScriptedLlm {
    replies: Mutex<HashMap<Stage, VecDeque<String>>>,
    prompts: Mutex<Vec<(Stage, String)>>,
    failing: Option<Stage>,
}

impl ScriptedLlm {
    fn reply(self, stage: Stage, text: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .push_back(text.to_string());
        self
    }

    fn failing_at(mut self, stage: Stage) -> Self {
        self.failing = Some(stage);
        self
    }

    fn calls(&self, stage: Stage) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl CompletionService for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let stage = Stage::of(prompt);
        self.prompts.lock().unwrap().push((stage, prompt.to_string()));
        if self.failing == Some(stage) {
            return Err(AssistantError::LlmStatus {
                provider: "gemini".to_string(),
                status: 503,
                body: "overloaded".to_string(),
            });
        }
        let mut replies = self.replies.lock().unwrap();
        let queue = replies.entry(stage).or_default();
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(reply.unwrap_or_default())
    }
}

#[derive(Default)]
struct RecordingPlatform {
    models: Vec<ModelListing>,
    fields: Option<ExploreFields>,
    dashboards: Vec<DashboardSummary>,
    query_data: String,
    calls: Mutex<Vec<String>>,
    queries: Mutex<Vec<QueryBody>>,
    tiles: Mutex<Vec<(String, String, String)>>,
    plans: Mutex<Vec<ScheduledPlanRequest>>,
    /// Explore keys whose next describe call answers 429
    throttled: Mutex<Vec<String>>,
}

impl RecordingPlatform {
    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchemaSource for RecordingPlatform {
    async fn list_models(&self) -> Result<Vec<ModelListing>> {
        self.record("list_models");
        Ok(self.models.clone())
    }

    async fn describe_explore(&self, model: &str, explore: &str) -> Result<ExploreFields> {
        self.record("describe_explore");
        let key = format!("{}:{}", model, explore);
        let mut throttled = self.throttled.lock().unwrap();
        if let Some(pos) = throttled.iter().position(|k| *k == key) {
            throttled.remove(pos);
            return Err(AssistantError::Api {
                service: "looker".to_string(),
                status: 429,
                message: "Too many requests".to_string(),
            });
        }
        drop(throttled);
        self.fields.clone().ok_or_else(|| AssistantError::Api {
            service: "looker".to_string(),
            status: 404,
            message: format!("{}::{} not found", model, explore),
        })
    }
}

#[async_trait]
impl QueryService for RecordingPlatform {
    async fn create_query(&self, body: &QueryBody) -> Result<CreatedQuery> {
        self.record("create_query");
        let mut queries = self.queries.lock().unwrap();
        queries.push(body.clone());
        Ok(CreatedQuery {
            id: format!("q{}", queries.len()),
            client_id: None,
        })
    }

    async fn run_query(&self, _query_id: &str, format: &str) -> Result<String> {
        self.record(&format!("run_query:{}", format));
        Ok(self.query_data.clone())
    }
}

#[async_trait]
impl DashboardService for RecordingPlatform {
    async fn list_dashboards(&self) -> Result<Vec<DashboardSummary>> {
        self.record("list_dashboards");
        Ok(self.dashboards.clone())
    }

    async fn create_dashboard(&self, title: &str) -> Result<DashboardSummary> {
        self.record("create_dashboard");
        Ok(DashboardSummary {
            id: "42".to_string(),
            title: title.to_string(),
        })
    }

    async fn add_tile(
        &self,
        dashboard_id: &str,
        query_id: &str,
        title: &str,
    ) -> Result<DashboardElement> {
        self.record("add_tile");
        self.tiles.lock().unwrap().push((
            dashboard_id.to_string(),
            query_id.to_string(),
            title.to_string(),
        ));
        Ok(DashboardElement {
            id: Some("1".to_string()),
            dashboard_id: dashboard_id.to_string(),
            query_id: query_id.to_string(),
            title: Some(title.to_string()),
        })
    }
}

#[async_trait]
impl SchedulingService for RecordingPlatform {
    async fn create_scheduled_plan(&self, request: &ScheduledPlanRequest) -> Result<ScheduledPlan> {
        self.record("create_scheduled_plan");
        self.plans.lock().unwrap().push(request.clone());
        Ok(ScheduledPlan {
            id: Some("7".to_string()),
            name: request.title.clone(),
            crontab: Some(request.crontab.clone()),
        })
    }
}

fn field(name: &str, field_type: &str) -> PlatformField {
    PlatformField {
        name: name.to_string(),
        field_type: Some(field_type.to_string()),
        ..Default::default()
    }
}

fn ecommerce_platform() -> RecordingPlatform {
    RecordingPlatform {
        models: vec![ModelListing {
            name: "ecommerce".to_string(),
            explores: vec![
                ExploreListing {
                    name: "orders".to_string(),
                    label: Some("Orders".to_string()),
                    hidden: None,
                },
                ExploreListing {
                    name: "internal_audit".to_string(),
                    label: None,
                    hidden: Some(true),
                },
                ExploreListing {
                    name: "users".to_string(),
                    label: None,
                    hidden: Some(false),
                },
            ],
        }],
        fields: Some(ExploreFields {
            dimensions: vec![
                field("orders.created_date", "date_date"),
                field("orders.status", "string"),
                field("users.state", "string"),
                PlatformField {
                    hidden: Some(true),
                    ..field("orders.internal_id", "number")
                },
            ],
            measures: vec![
                field("orders.count", "count"),
                field("orders.total_revenue", "sum"),
            ],
        }),
        query_data: "| orders.status | orders.count |\n|---|---|\n| complete | 12 |".to_string(),
        ..Default::default()
    }
}

const BASE_QUERY: &str = r#"```json
{
  "model": "ecommerce",
  "view": "orders",
  "fields": ["orders.created_date", "orders.count", "orders.bogus", "orders.count"],
  "sorts": ["orders.count desc", "ghost.field asc"],
  "limit": "100",
  "vis_config": {"type": "looker_column"}
}
```"#;

const FILTERS: &str = r#"[
  {"field_id": "orders.status", "filter_expression": "complete"},
  {"field_id": "orders.created_date", "filter_expression": "complete"},
  {"field_id": "orders.created_date", "filter_expression": "last 30 days"},
  {"field_id": "orders.nope", "filter_expression": "1"}
]"#;

fn explore_llm() -> ScriptedLlm {
    ScriptedLlm::default()
        .reply(Stage::PromptSummary, "Completed orders by day over the last 30 days")
        .reply(Stage::Intent, r#"{"intent": "explore"}"#)
        .reply(Stage::Filters, FILTERS)
        .reply(Stage::BaseQuery, BASE_QUERY)
}

async fn setup(
    llm: ScriptedLlm,
    platform: RecordingPlatform,
) -> (Orchestrator, Session, Arc<ScriptedLlm>, Arc<RecordingPlatform>) {
    let llm = Arc::new(llm);
    let platform = Arc::new(platform);
    let directory = Arc::new(SchemaDirectory::new(platform.clone()));
    let orchestrator = Orchestrator::new(
        llm.clone(),
        platform.clone(),
        directory,
        ExampleLibrary::default(),
    )
    .with_base_url("https://looker.example.com");
    let mut session = Session::new();
    orchestrator.initialize(&mut session).await.unwrap();
    platform.calls.lock().unwrap().clear();
    (orchestrator, session, llm, platform)
}

fn last_text(session: &Session) -> String {
    session
        .thread()
        .messages
        .last()
        .and_then(|m| m.text())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_discovery_skips_hidden_explores_and_loads_default() {
    let (orchestrator, session, _, _) = setup(ScriptedLlm::default(), ecommerce_platform()).await;

    let keys: Vec<&str> = session
        .available_explores()
        .iter()
        .map(|e| e.explore_key.as_str())
        .collect();
    assert_eq!(keys, vec!["ecommerce:orders", "ecommerce:users"]);
    assert_eq!(session.available_explores()[1].label, "users");
    assert_eq!(session.current_explore().unwrap().explore_key, "ecommerce:orders");

    let model = orchestrator.directory().get("ecommerce:orders").unwrap();
    assert!(model.is_ready());
    assert!(model.field("orders.internal_id").is_none());
}

#[tokio::test]
async fn test_explore_turn_keeps_only_valid_parts() {
    let (orchestrator, mut session, llm, platform) =
        setup(explore_llm(), ecommerce_platform()).await;

    let outcome = orchestrator
        .submit(&mut session, "how many completed orders per day last month?")
        .await
        .unwrap();

    assert_eq!(outcome.intent, Some(Intent::Explore));
    let params = outcome.explore_params.unwrap();
    assert_eq!(params.fields, vec!["orders.created_date", "orders.count"]);
    assert_eq!(params.sorts, vec!["orders.count desc"]);
    assert_eq!(params.filters.len(), 2);
    assert_eq!(params.filters["orders.status"], "complete");
    assert_eq!(params.filters["orders.created_date"], "last 30 days");
    assert_eq!(params.limit.as_deref(), Some("100"));
    assert_eq!(params.vis_config.vis_type, VisType::Column);

    let url = outcome.explore_url.unwrap();
    assert!(url.starts_with("https://looker.example.com/explore/ecommerce/orders?"));
    assert!(url.ends_with("toggle=vis%2Cdata"));

    assert_eq!(llm.calls(Stage::Filters).len(), 1);
    assert_eq!(llm.calls(Stage::BaseQuery).len(), 1);
    assert!(platform.calls().is_empty());
    assert!(!session.is_in_flight());
    assert_eq!(
        session.thread().summarized_prompt,
        "Completed orders by day over the last 30 days"
    );
}

#[tokio::test]
async fn test_prompt_history_is_summarized_each_turn() {
    let llm = ScriptedLlm::default()
        .reply(Stage::PromptSummary, "\"Total sales in California\"")
        .reply(Stage::PromptSummary, "Total sales in Texas")
        .reply(Stage::Intent, r#"{"intent": "explore"}"#)
        .reply(Stage::Filters, FILTERS)
        .reply(Stage::BaseQuery, BASE_QUERY);
    let (orchestrator, mut session, llm, _) = setup(llm, ecommerce_platform()).await;

    orchestrator
        .submit(&mut session, "total sales in California")
        .await
        .unwrap();
    assert_eq!(session.thread().summarized_prompt, "Total sales in California");

    let outcome = orchestrator
        .submit(&mut session, "actually, Texas instead")
        .await
        .unwrap();
    assert_eq!(outcome.summarized_prompt, "Total sales in Texas");

    let summaries = llm.calls(Stage::PromptSummary);
    assert_eq!(summaries.len(), 2);
    assert!(summaries[1].contains("total sales in California"));
    assert!(summaries[1].contains("actually, Texas instead"));
    assert!(llm.calls(Stage::BaseQuery)[1].contains("Total sales in Texas"));
}

#[tokio::test]
async fn test_empty_summary_stops_the_turn() {
    let llm = ScriptedLlm::default()
        .reply(Stage::PromptSummary, "  ")
        .reply(Stage::Intent, r#"{"intent": "explore"}"#);
    let (orchestrator, mut session, llm, _) = setup(llm, ecommerce_platform()).await;

    let outcome = orchestrator.submit(&mut session, "hmm").await.unwrap();
    assert_eq!(last_text(&session), NO_SUMMARY_MESSAGE);
    assert!(outcome.explore_params.is_none());
    assert!(llm.calls(Stage::BaseQuery).is_empty());
}

#[tokio::test]
async fn test_dashboard_add_without_title_asks_and_touches_nothing() {
    let llm = ScriptedLlm::default()
        .reply(Stage::PromptSummary, "Orders by status")
        .reply(Stage::Intent, r#"{"intent": "dashboard", "meta": {"action": "add"}}"#);
    let (orchestrator, mut session, llm, platform) = setup(llm, ecommerce_platform()).await;

    let outcome = orchestrator
        .submit(&mut session, "add this to a dashboard")
        .await
        .unwrap();

    assert_eq!(outcome.intent, Some(Intent::Dashboard));
    assert_eq!(last_text(&session), MISSING_DASHBOARD_TITLE);
    assert!(platform.calls().is_empty());
    assert!(llm.calls(Stage::BaseQuery).is_empty());
}

#[tokio::test]
async fn test_dashboard_add_matches_title_case_insensitively() {
    let llm = explore_llm().reply(
        Stage::Intent,
        r#"{"intent": "dashboard", "meta": {"action": "add", "title": "sales overview"}}"#,
    );
    let platform = RecordingPlatform {
        dashboards: vec![
            DashboardSummary {
                id: "3".to_string(),
                title: "Marketing".to_string(),
            },
            DashboardSummary {
                id: "7".to_string(),
                title: "Sales Overview".to_string(),
            },
        ],
        ..ecommerce_platform()
    };
    let (orchestrator, mut session, _, platform) = setup(llm, platform).await;

    // first turn builds the query the dashboard action reuses
    orchestrator.submit(&mut session, "orders by day").await.unwrap();
    orchestrator
        .submit(&mut session, "add it to Sales Overview")
        .await
        .unwrap();

    assert_eq!(
        last_text(&session),
        "Added tile to dashboard \"[Sales Overview](/dashboards/7)\"."
    );
    assert_eq!(
        platform.calls(),
        vec!["list_dashboards", "create_query", "add_tile"]
    );
    let tiles = platform.tiles.lock().unwrap().clone();
    assert_eq!(tiles[0].0, "7");
    let queries = platform.queries.lock().unwrap().clone();
    assert_eq!(queries[0].model, "ecommerce");
    assert_eq!(queries[0].view, "orders");
}

#[tokio::test]
async fn test_dashboard_create_then_tile() {
    let llm = explore_llm().reply(
        Stage::Intent,
        r#"{"intent": "dashboard", "meta": {"action": "create", "title": "Weekly KPIs"}}"#,
    );
    let (orchestrator, mut session, _, platform) = setup(llm, ecommerce_platform()).await;

    orchestrator.submit(&mut session, "orders by day").await.unwrap();
    orchestrator
        .submit(&mut session, "put this on a new dashboard called Weekly KPIs")
        .await
        .unwrap();

    assert_eq!(
        last_text(&session),
        "Created new dashboard \"[Weekly KPIs](/dashboards/42)\" and added tile."
    );
    assert_eq!(
        platform.calls(),
        vec!["create_dashboard", "create_query", "add_tile"]
    );
}

#[tokio::test]
async fn test_dashboard_add_unknown_title() {
    let llm = explore_llm().reply(
        Stage::Intent,
        r#"{"intent": "dashboard", "meta": {"title": "Nowhere"}}"#,
    );
    let (orchestrator, mut session, _, platform) = setup(llm, ecommerce_platform()).await;

    orchestrator.submit(&mut session, "orders by day").await.unwrap();
    orchestrator
        .submit(&mut session, "add to Nowhere")
        .await
        .unwrap();

    assert_eq!(last_text(&session), "Could not find dashboard \"Nowhere\".");
    assert_eq!(platform.calls(), vec!["list_dashboards"]);
}

#[tokio::test]
async fn test_schedule_maps_frequency_to_crontab() {
    let llm = explore_llm().reply(
        Stage::Intent,
        r#"{"intent": "schedule", "meta": {"email": "ana@example.com", "frequency": "weekly"}}"#,
    );
    let (orchestrator, mut session, _, platform) = setup(llm, ecommerce_platform()).await;

    orchestrator.submit(&mut session, "orders by day").await.unwrap();
    orchestrator
        .submit(&mut session, "email this to ana@example.com every week")
        .await
        .unwrap();

    assert_eq!(last_text(&session), "Scheduled report to ana@example.com (weekly).");
    let plans = platform.plans.lock().unwrap().clone();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].crontab, "0 6 * * 1");
    assert_eq!(plans[0].format, "csv_zip");
    assert_eq!(plans[0].title, "Scheduled Report");
    assert_eq!(plans[0].query_id, "q1");
}

#[tokio::test]
async fn test_schedule_without_email_asks_for_one() {
    let llm = explore_llm().reply(Stage::Intent, r#"{"intent": "schedule", "meta": {}}"#);
    let (orchestrator, mut session, _, platform) = setup(llm, ecommerce_platform()).await;

    orchestrator.submit(&mut session, "orders by day").await.unwrap();
    orchestrator
        .submit(&mut session, "schedule this daily")
        .await
        .unwrap();

    assert_eq!(last_text(&session), MISSING_EMAIL);
    assert!(platform.calls().is_empty());
}

#[tokio::test]
async fn test_refine_without_previous_explore() {
    let llm = ScriptedLlm::default()
        .reply(Stage::PromptSummary, "Make it a bar chart")
        .reply(Stage::Intent, r#"{"intent": "refine"}"#);
    let (orchestrator, mut session, llm, _) = setup(llm, ecommerce_platform()).await;

    let outcome = orchestrator
        .submit(&mut session, "make it a bar chart")
        .await
        .unwrap();

    assert_eq!(outcome.intent, Some(Intent::Refine));
    assert_eq!(last_text(&session), NOTHING_TO_REFINE);
    assert!(llm.calls(Stage::Refine).is_empty());
}

#[tokio::test]
async fn test_refine_replaces_only_the_visualization() {
    let llm = explore_llm()
        .reply(Stage::Intent, r#"{"intent": "refine"}"#)
        .reply(Stage::Refine, r#"{"type": "looker_bar", "stacking": "normal"}"#);
    let (orchestrator, mut session, llm, _) = setup(llm, ecommerce_platform()).await;

    let first = orchestrator.submit(&mut session, "orders by day").await.unwrap();
    let before = first.explore_params.unwrap();
    let second = orchestrator
        .submit(&mut session, "make it a stacked bar chart")
        .await
        .unwrap();

    let after = second.explore_params.unwrap();
    assert_eq!(after.vis_config.vis_type, VisType::Bar);
    assert_eq!(after.vis_config.options["stacking"], "normal");
    assert_eq!(after.fields, before.fields);
    assert_eq!(after.filters, before.filters);
    assert!(matches!(
        &session.thread().messages.last().unwrap().kind,
        MessageKind::Explore { summarized_prompt, .. } if summarized_prompt == REFINED_PROMPT
    ));

    let refine_prompts = llm.calls(Stage::Refine);
    assert_eq!(refine_prompts.len(), 1);
    assert!(refine_prompts[0].contains("make it a stacked bar chart"));
    assert_eq!(llm.calls(Stage::BaseQuery).len(), 1);
}

#[tokio::test]
async fn test_summary_turn_runs_query_and_condenses() {
    let llm = ScriptedLlm::default()
        .reply(Stage::PromptSummary, "Orders by status")
        .reply(Stage::Intent, r#"{"intent": "summary"}"#)
        .reply(Stage::Filters, "[]")
        .reply(Stage::BaseQuery, r#"{"fields": ["orders.status", "orders.count"]}"#)
        .reply(Stage::DataSummary, "Most orders are complete.")
        .reply(Stage::Slides, "## Orders\n- 12 complete orders");
    let (orchestrator, mut session, llm, platform) = setup(llm, ecommerce_platform()).await;

    let outcome = orchestrator
        .submit(&mut session, "summarize orders by status")
        .await
        .unwrap();

    assert_eq!(outcome.intent, Some(Intent::Summary));
    assert_eq!(last_text(&session), "## Orders\n- 12 complete orders");
    assert_eq!(platform.calls(), vec!["create_query", "run_query:md"]);
    assert!(llm.calls(Stage::DataSummary)[0].contains("| complete | 12 |"));
    assert!(llm.calls(Stage::Slides)[0].contains("Most orders are complete."));
    assert!(outcome.explore_params.is_some());
}

#[tokio::test]
async fn test_unloaded_schema_reports_not_ready() {
    let platform = RecordingPlatform {
        fields: None,
        ..ecommerce_platform()
    };
    let (orchestrator, mut session, llm, platform) = setup(explore_llm(), platform).await;

    assert_eq!(session.current_explore().unwrap().explore_key, "ecommerce:orders");
    assert!(orchestrator.directory().get("ecommerce:orders").is_none());
    let outcome = orchestrator
        .submit(&mut session, "orders by day")
        .await
        .unwrap();

    assert_eq!(outcome.intent, Some(Intent::Explore));
    assert_eq!(last_text(&session), NOT_READY_MESSAGE);
    assert_eq!(platform.calls(), vec!["describe_explore"]);
    assert!(llm.calls(Stage::BaseQuery).is_empty());
}

#[tokio::test]
async fn test_throttled_explore_stays_selectable_and_loads_later() {
    let platform = RecordingPlatform {
        throttled: Mutex::new(vec!["ecommerce:orders".to_string()]),
        ..ecommerce_platform()
    };
    let (orchestrator, mut session, _, _) = setup(explore_llm(), platform).await;

    assert!(orchestrator.directory().get("ecommerce:orders").is_none());
    let keys: Vec<&str> = session
        .available_explores()
        .iter()
        .map(|e| e.explore_key.as_str())
        .collect();
    assert_eq!(keys, vec!["ecommerce:orders", "ecommerce:users"]);

    session.set_current_explore("ecommerce:users").unwrap();
    session.set_current_explore("ecommerce:orders").unwrap();
    let outcome = orchestrator
        .submit(&mut session, "orders by day")
        .await
        .unwrap();

    assert_eq!(outcome.intent, Some(Intent::Explore));
    assert!(outcome.explore_params.is_some());
    assert!(orchestrator.directory().is_loaded("ecommerce:orders"));
}

#[tokio::test]
async fn test_schema_without_measures_is_reported_not_retried_as_not_ready() {
    let mut platform = ecommerce_platform();
    if let Some(fields) = platform.fields.as_mut() {
        fields.measures.clear();
    }
    let (orchestrator, mut session, llm, _) = setup(explore_llm(), platform).await;

    let outcome = orchestrator
        .submit(&mut session, "orders by day")
        .await
        .unwrap();

    assert_eq!(outcome.intent, None);
    let text = last_text(&session);
    assert!(text.starts_with("Error: Precondition failed"));
    assert!(text.contains("0 visible measures"));
    assert_ne!(text, NOT_READY_MESSAGE);
    assert!(!orchestrator.directory().is_loaded("ecommerce:orders"));
    assert!(llm.calls(Stage::BaseQuery).is_empty());
    assert!(!session.is_in_flight());
}

#[tokio::test]
async fn test_llm_failure_becomes_error_message() {
    let (orchestrator, mut session, _, _) =
        setup(explore_llm().failing_at(Stage::Intent), ecommerce_platform()).await;

    let outcome = orchestrator
        .submit(&mut session, "orders by day")
        .await
        .unwrap();

    assert_eq!(outcome.intent, None);
    assert!(last_text(&session).starts_with("Error:"));
    assert!(last_text(&session).contains("503"));
    assert!(!session.is_in_flight());

    // the session accepts the next turn
    assert!(orchestrator.submit(&mut session, "again").await.is_ok());
}

#[tokio::test]
async fn test_switching_explore_loads_its_schema_on_demand() {
    let (orchestrator, mut session, _, platform) =
        setup(explore_llm(), ecommerce_platform()).await;

    assert_eq!(orchestrator.directory().loaded_keys(), vec!["ecommerce:orders"]);
    session.set_current_explore("ecommerce:users").unwrap();
    assert!(orchestrator.load_current(&session).await.is_some());
    assert!(orchestrator.load_current(&session).await.is_some());
    assert_eq!(platform.calls(), vec!["describe_explore"]);
    assert!(session.set_current_explore("ecommerce:internal_audit").is_err());
}
