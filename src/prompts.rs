//! Prompt Composer - grounded prompts for each pipeline stage
//!
//! The shared context carries the reference documentation, the live field
//! catalogue of the current explore and a handful of few-shot examples.
//! Every prompt that expects structured output shows one concrete example
//! of that structure and asks for nothing else.

use crate::error::{AssistantError, Result};
use crate::query::{ExploreParams, VisConfig, VisType};
use crate::semantic::{Field, SemanticModel};
use chrono::{DateTime, SecondsFormat, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

pub const FILTER_DOC: &str = include_str!("../docs/reference/filter_expressions.md");
pub const INTERVAL_DOC: &str = include_str!("../docs/reference/intervals_timeframes.md");
pub const VISUALIZATION_DOC: &str = include_str!("../docs/reference/visualizations.md");
pub const PIVOT_DOC: &str = include_str!("../docs/reference/pivots_url_parameters.md");

/// Few-shot examples rendered into the shared context, at most.
pub const MAX_EXAMPLES: usize = 10;

/// A question and the query object that answers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationExample {
    pub input: String,
    pub output: Value,
}

/// A sequence of user prompts and the single question they summarise to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementExample {
    pub input: Vec<String>,
    pub output: String,
}

/// Few-shot examples keyed by explore key (`model:explore`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExampleLibrary {
    #[serde(default)]
    pub explore_generation_examples: HashMap<String, Vec<GenerationExample>>,
    #[serde(default)]
    pub explore_refinement_examples: HashMap<String, Vec<RefinementExample>>,
}

impl ExampleLibrary {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let library: Self = serde_json::from_str(&text)?;
        info!(
            "Loaded examples for {} explores from {}",
            library.explore_generation_examples.len(),
            path.display()
        );
        Ok(library)
    }

    pub fn generation(&self, explore_key: &str) -> &[GenerationExample] {
        self.explore_generation_examples
            .get(explore_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn refinement(&self, explore_key: &str) -> &[RefinementExample] {
        self.explore_refinement_examples
            .get(explore_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").split_whitespace().join(" ")
}

fn field_row(field: &Field) -> String {
    format!(
        "| {} | {} | {} | {} | {} |",
        field.name,
        field.field_type,
        cell(&field.label),
        cell(&field.description),
        field.tags.join(", ")
    )
}

fn field_table(fields: &[Field]) -> String {
    let mut rows = vec![
        "| Field Id | Type | Label | Description | Tags |".to_string(),
        "|----------|------|-------|-------------|------|".to_string(),
    ];
    rows.extend(fields.iter().map(field_row));
    rows.join("\n")
}

const QUERY_FORMAT_TABLE: &str = "\
| Field | Type | Description |
|-------|------|-------------|
| vis_config | object | Visualization config. MUST include 'type'. |
| fields | string[] | Dimensions and measures to select |
| pivots | string[] | Dimensions to pivot on; must also be in fields |
| fill_fields | string[] | Timeframe dimensions to fill |
| filters | object | Field id -> filter expression |
| sorts | string[] | \"field\" or \"field desc\" |
| limit | string | Row limit |
| column_limit | string | Pivot column limit |
| total | boolean | Add a totals row |";

/// Documentation, live schema and examples for one explore.
///
/// Fails with a precondition error if either catalogue is empty.
pub fn build_shared_context(model: &SemanticModel, examples: &[GenerationExample]) -> Result<String> {
    if model.dimensions.is_empty() || model.measures.is_empty() {
        return Err(AssistantError::Precondition(
            "Dimensions or measures are not defined".to_string(),
        ));
    }

    let example_text = examples
        .iter()
        .take(MAX_EXAMPLES)
        .map(|e| format!("input: \"{}\" ; output: {}", e.input, e.output))
        .join("\n");
    debug!(
        "Shared context for {}: {} dimensions, {} measures, {} examples",
        model.explore_key,
        model.dimensions.len(),
        model.measures.len(),
        examples.len().min(MAX_EXAMPLES)
    );

    Ok(format!(
        r#"# Documentation
Here is general documentation about filters:
{FILTER_DOC}
Here is general documentation on how intervals and timeframes are applied:
{INTERVAL_DOC}
Here is general documentation on visualizations:
{VISUALIZATION_DOC}
Here is general documentation on JSON fields and pivots:
{PIVOT_DOC}
## Format of query object

{QUERY_FORMAT_TABLE}

Valid visualization types: {vis_types}
# End Documentation

# Metadata
The fields below are the only fields that can be used in the response.
Model: {model_name}
Explore: {explore_id}

Dimensions are used to group by information (follow the instructions in tags when using a specific field; if a map is used include a location or lat long dimension):

{dimensions}

Measures are used to perform calculations (if top, bottom, total, sum, etc. are used include a measure):

{measures}
# End Metadata

# Examples
The examples below include fields, filters and sometimes visualization configs.
They were taken at a different date. ALL DATE RANGES ARE WRONG COMPARED TO THE CURRENT DATE.
Do not copy the examples 1:1; timeframes and date ranges may need to change.
{example_text}
# End Examples
"#,
        vis_types = VisType::catalogue(),
        model_name = model.model_name,
        explore_id = model.explore_id,
        dimensions = field_table(&model.dimensions),
        measures = field_table(&model.measures),
    ))
}

pub fn build_intent_prompt(user_text: &str) -> String {
    format!(
        r#"Primer
----------
A user is interacting with an agent that translates questions into a structured query. You are a very smart observer that will look at one such question and determine the user's intent.

Task
----------
Determine if the user is:
1. Asking for a data summary (e.g. "summarize the data", "explain this")
2. Asking to save/add to a dashboard (e.g. "add to dashboard Sales", "save as New Dashboard")
3. Asking to schedule a report (e.g. "schedule daily to user@example.com")
4. Asking to refine an existing visualization (e.g. "make it a bar chart", "change the color to red")
5. Asking a new data question or refining the query (e.g. "show revenue", "filter by year")

The user said:
{user_text}

Output
----------
Return a JSON object in this format:
{{"intent": "dashboard", "meta": {{"title": "Sales Overview", "action": "add", "email": null, "frequency": null}}}}

- intent is one of "summary", "dashboard", "schedule", "refine", "explore".
- meta.title and meta.action ("create" or "add") are for the dashboard intent.
- meta.email and meta.frequency ("hourly", "daily", "weekly", "monthly") are for the schedule intent.

Only return the JSON object."#
    )
}

/// Collapse the running prompt history into one question.
pub fn build_prompt_summary_prompt(prompt_list: &[String], examples: &[RefinementExample]) -> String {
    let example_text = examples
        .iter()
        .map(|e| {
            let inputs = e.input.iter().map(|p| format!("\"{}\"", p)).join(", ");
            format!(
                "- The sequence of prompts from the user: {}. The summarized prompt: \"{}\"",
                inputs, e.output
            )
        })
        .join("\n");
    let conversation = prompt_list.iter().map(|p| format!("\"{}\"", p)).join("\n");

    format!(
        r#"Primer
----------
A user is interactively asking questions to generate a query. The user is refining the question by adding more context. The additional prompts could have conflicting or duplicative information: in those cases, prefer the most recent prompt.

Here are some example prompt sequences and how to summarize them:
{example_text}
- The sequence of prompts from the user: "count of users", "only active ones", "actually the inactive ones". The summarized prompt: "count of inactive users"

Conversation so far
----------
{conversation}

Task
----------
Summarize the prompts above into a single prompt that includes all the relevant information. If there is conflicting or duplicative information, prefer the most recent prompt.

Only return the summarized prompt with no extra explanation or text."#
    )
}

pub fn build_filter_prompt(user_text: &str, shared_context: &str) -> String {
    format!(
        r#"{shared_context}

# Instructions

The user asked the following question:

```
{user_text}
```

Follow the steps below and generate a JSON list.

* Step 1: Look at the data question and determine the filter expressions for it. Return a JSON list of filters to apply. Each element is a pair of a field id and a filter expression, for example:
[{{"field_id": "example_view.created_date", "filter_expression": "this year"}}]
* Step 2: Verify that you are only using valid expressions for the field's type. If you do not know the valid expressions, refer to the documentation above. If you are still unsure, do not use the filter.
* Step 3: Verify that every field id is a Field Id from the tables above. There is always a period in a field id. If no filter applies, return [].

Only return the JSON list."#
    )
}

pub fn build_base_query_prompt(user_text: &str, shared_context: &str, now: &DateTime<Utc>) -> String {
    let current = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    format!(
        r#"{shared_context}

Output
----------

Return a JSON object describing the query, as in this example:

{{
  "fields": ["category.name", "inventory_items.days_in_inventory_tier", "products.count"],
  "filters": {{"category.name": "socks"}},
  "sorts": ["products.count desc"],
  "limit": "500",
  "vis_config": {{"type": "looker_column"}}
}}

Instructions:
- DO NOT add a model or a view, they are not needed in the response.
- Determine the best visualization type (vis_config.type) for the request and the data. You MUST choose one of the valid visualization types listed above. Default to 'looker_grid' if unsure.
- Choose only fields from the metadata above.
- Prioritize the field description, label, tags and name when picking the field(s) for a given description.
- Generate only one answer.
- Use the examples for guidance on how to structure the body.
- Avoid dynamic_fields unless a very similar example uses them.
- Always use the current date ({current}) when the request involves timeframes.
- Only respond with the JSON object.

User Request
----------
{user_text}"#
    )
}

pub fn build_summary_prompt(tabular_result: &str) -> String {
    format!(
        r#"Data
----------
{tabular_result}

Task
----------
Summarize the data above"#
    )
}

/// Condense a free-form data summary into slide sections.
pub fn build_slide_prompt(summary: &str) -> String {
    format!(
        r#"The following text summarizes a query's data.
Summaries: {summary}

Make this much more concise for a slide presentation. Return a markdown document made of sections. Each section has a title for that part of the summary and a list of key points, for example:

## Revenue
- Revenue grew 12% month over month
- Outerwear drove most of the growth

Include the data in each section. Include each summary only once."#
    )
}

/// Ask for a modified visualization config; only `vis_config` changes.
pub fn build_refine_prompt(
    user_text: &str,
    vis_config: &VisConfig,
    params: &ExploreParams,
    model: &SemanticModel,
) -> String {
    let current = serde_json::to_string_pretty(&vis_config.to_value()).unwrap_or_default();
    let dimensions = params
        .fields
        .iter()
        .filter(|f| model.is_dimension(f) && !params.pivots.contains(*f))
        .join(", ");
    let measures = params
        .fields
        .iter()
        .filter(|f| model.is_measure(f))
        .join(", ");
    let pivots = params.pivots.join(", ");

    format!(
        r##"# Task
You are an expert in visualization configuration. Modify an existing visualization config JSON based on a user's request.
- Only modify the properties relevant to the user's request.
- Return a complete, valid JSON object.
- Do not change the chart 'type' unless explicitly asked to. Valid types: {vis_types}

# Context
Here is the existing visualization config:
```json
{current}
```

Here are the fields used in the query, which may be relevant for applying colors to specific series:
- Dimensions: {dimensions}
- Pivots: {pivots}
- Measures: {measures}

# User Request
"{user_text}"

# Output
Return only the modified, complete JSON object for the new visualization config, for example:
{{"type": "looker_bar", "series_colors": {{"orders.count": "#d62728"}}}}"##,
        vis_types = VisType::catalogue(),
    )
}

/// Prefix a free-form prompt with the current date.
pub fn with_current_date(prompt: &str, now: &DateTime<Utc>) -> String {
    format!(
        "The current date is {}\n\n{}",
        now.format("%Y-%m-%d %H:%M:%S UTC"),
        prompt
    )
}
