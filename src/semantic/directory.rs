//! Schema Directory
//!
//! Discovers explores and caches one `SemanticModel` per explore key.
//! Schemas load on demand. A failed load is logged and leaves no cache
//! entry, so the next request for that explore tries again.

use crate::error::{AssistantError, Result};
use crate::platform::{PlatformField, SchemaSource};
use crate::semantic::field::{ExploreRef, Field, SemanticModel};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Upper bound on concurrent `describe_explore` calls in `load_all`.
pub const MAX_CONCURRENT_LOADS: usize = 4;

pub struct SchemaDirectory {
    source: Arc<dyn SchemaSource>,
    models: DashMap<String, Arc<SemanticModel>>,
}

impl SchemaDirectory {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            source,
            models: DashMap::new(),
        }
    }

    /// List every non-hidden explore across all models.
    pub async fn discover_explores(&self) -> Result<Vec<ExploreRef>> {
        info!("Fetching all available models and explores");
        let models = self.source.list_models().await?;

        let explores: Vec<ExploreRef> = models
            .iter()
            .flat_map(|model| {
                model
                    .explores
                    .iter()
                    .filter(|e| !e.name.is_empty() && e.hidden != Some(true))
                    .map(move |e| {
                        ExploreRef::new(&model.name, &e.name)
                            .with_label(e.label.clone().unwrap_or_else(|| e.name.clone()))
                    })
            })
            .collect();

        info!(
            "Found {} explores across {} models",
            explores.len(),
            models.len()
        );
        if explores.is_empty() {
            warn!("No explores found in any model");
        }
        Ok(explores)
    }

    /// Fetch, filter and cache the semantic model of one explore.
    ///
    /// A successful load replaces any cached model for the same key.
    pub async fn load_schema(&self, explore: &ExploreRef) -> Result<Arc<SemanticModel>> {
        info!("Loading semantic model for {}", explore.explore_key);
        let fields = self
            .source
            .describe_explore(&explore.model_name, &explore.explore_id)
            .await?;

        let model = SemanticModel::new(
            explore,
            visible_fields(fields.dimensions),
            visible_fields(fields.measures),
        );
        if !model.is_ready() {
            return Err(AssistantError::Precondition(format!(
                "Explore {} has {} visible dimensions and {} visible measures; both are required",
                explore.explore_key,
                model.dimensions.len(),
                model.measures.len()
            )));
        }

        info!(
            "Loaded {} dimensions and {} measures for {}",
            model.dimensions.len(),
            model.measures.len(),
            explore.explore_key
        );
        let model = Arc::new(model);
        self.models
            .insert(explore.explore_key.clone(), Arc::clone(&model));
        Ok(model)
    }

    /// Load many explores, at most `MAX_CONCURRENT_LOADS` at a time.
    /// Returns the sorted keys that loaded; failures are logged and skipped.
    pub async fn load_all(&self, explores: &[ExploreRef]) -> Vec<String> {
        let mut loaded: Vec<String> = stream::iter(explores)
            .map(|explore| async move {
                match self.load_schema(explore).await {
                    Ok(model) => Some(model.explore_key.clone()),
                    Err(e) => {
                        log_schema_failure(explore, &e);
                        None
                    }
                }
            })
            .buffer_unordered(MAX_CONCURRENT_LOADS)
            .filter_map(|key| async move { key })
            .collect()
            .await;
        loaded.sort();
        loaded
    }

    /// Cached model, or a fresh load. Transient failures (403, 404, 429,
    /// transport) are logged and give `Ok(None)`; a schema that can never
    /// ground a query is returned as the `Precondition` error.
    pub async fn ensure_loaded(&self, explore: &ExploreRef) -> Result<Option<Arc<SemanticModel>>> {
        if let Some(model) = self.get(&explore.explore_key) {
            return Ok(Some(model));
        }
        match self.load_schema(explore).await {
            Ok(model) => Ok(Some(model)),
            Err(e) if e.is_precondition() => Err(e),
            Err(e) => {
                log_schema_failure(explore, &e);
                Ok(None)
            }
        }
    }

    /// Cached model, if present; otherwise load it (fail-soft).
    pub async fn get_or_load(&self, explore: &ExploreRef) -> Option<Arc<SemanticModel>> {
        match self.ensure_loaded(explore).await {
            Ok(model) => model,
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    pub fn get(&self, explore_key: &str) -> Option<Arc<SemanticModel>> {
        self.models.get(explore_key).map(|m| Arc::clone(m.value()))
    }

    /// Register an already-built model (replaces any previous entry).
    pub fn insert(&self, model: SemanticModel) {
        self.models
            .insert(model.explore_key.clone(), Arc::new(model));
    }

    pub fn is_loaded(&self, explore_key: &str) -> bool {
        self.models.contains_key(explore_key)
    }

    pub fn loaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.models.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

fn visible_fields(fields: Vec<PlatformField>) -> Vec<Field> {
    fields
        .into_iter()
        .filter(|f| f.hidden != Some(true) && !f.name.is_empty())
        .map(|f| Field {
            name: f.name,
            field_type: f.field_type.unwrap_or_default(),
            label: f.label.unwrap_or_default(),
            description: f.description.unwrap_or_default(),
            tags: f.tags.unwrap_or_default(),
        })
        .collect()
}

fn log_schema_failure(explore: &ExploreRef, err: &AssistantError) {
    match err.status() {
        Some(403) | Some(404) | Some(429) | None => warn!(
            "Could not load explore {}: it may not exist or you may not have permission ({})",
            explore.explore_key, err
        ),
        Some(status) => error!(
            "Unexpected error ({}) loading semantic model for {}: {}",
            status, explore.explore_key, err
        ),
    }
}
