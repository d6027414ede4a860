//! Session State
//!
//! One owned context per user: the explores on offer, the current explore,
//! the running thread and archived threads. The pipeline reads and writes
//! it at fixed points of a turn; nothing here is global.

use crate::error::{AssistantError, Result};
use crate::query::ExploreParams;
use crate::semantic::ExploreRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    User,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    Text {
        text: String,
    },
    /// A generated query, rendered by the host as an embedded explore
    Explore {
        explore_key: String,
        params: ExploreParams,
        summarized_prompt: String,
    },
    /// Markdown summary of a query's data
    Summary {
        explore_key: String,
        params: ExploreParams,
        summary: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub uuid: String,
    pub actor: Actor,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl Message {
    fn new(actor: Actor, kind: MessageKind) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            actor,
            created_at: Utc::now(),
            kind,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Actor::User, MessageKind::Text { text: text.into() })
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Actor::System, MessageKind::Text { text: text.into() })
    }

    pub fn explore(explore_key: &str, params: ExploreParams, summarized_prompt: &str) -> Self {
        Self::new(
            Actor::System,
            MessageKind::Explore {
                explore_key: explore_key.to_string(),
                params,
                summarized_prompt: summarized_prompt.to_string(),
            },
        )
    }

    pub fn summary(explore_key: &str, params: ExploreParams, summary: &str) -> Self {
        Self::new(
            Actor::System,
            MessageKind::Summary {
                explore_key: explore_key.to_string(),
                params,
                summary: summary.to_string(),
            },
        )
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text { text } => Some(text),
            MessageKind::Summary { summary, .. } => Some(summary),
            MessageKind::Explore { .. } => None,
        }
    }

    /// The query carried by an explore message.
    pub fn explore_params(&self) -> Option<&ExploreParams> {
        match &self.kind {
            MessageKind::Explore { params, .. } => Some(params),
            _ => None,
        }
    }

    /// The query carried by an explore or summary message.
    pub fn query_params(&self) -> Option<&ExploreParams> {
        match &self.kind {
            MessageKind::Explore { params, .. } | MessageKind::Summary { params, .. } => Some(params),
            MessageKind::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub uuid: String,
    pub explore_key: Option<String>,
    /// Every user prompt in this thread, oldest first
    pub prompt_list: Vec<String>,
    pub messages: Vec<Message>,
    /// Latest query produced in this thread
    pub explore_params: Option<ExploreParams>,
    pub summarized_prompt: String,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(explore_key: Option<String>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            explore_key,
            prompt_list: Vec::new(),
            messages: Vec::new(),
            explore_params: None,
            summarized_prompt: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Last message before the current user prompt.
    pub fn previous_message(&self) -> Option<&Message> {
        let n = self.messages.len();
        match self.messages.last() {
            Some(m) if m.actor == Actor::User => n.checked_sub(2).map(|i| &self.messages[i]),
            other => other,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    explores: Vec<ExploreRef>,
    current_explore: Option<ExploreRef>,
    thread: Thread,
    history: Vec<Thread>,
    in_flight: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            explores: Vec::new(),
            current_explore: None,
            thread: Thread::new(None),
            history: Vec::new(),
            in_flight: false,
        }
    }

    /// Record the discovered explores; the first becomes current if none is set.
    pub fn set_available_explores(&mut self, explores: Vec<ExploreRef>) {
        self.explores = explores;
        if self.current_explore.is_none() {
            if let Some(first) = self.explores.first().cloned() {
                info!("Defaulting to explore {}", first.explore_key);
                self.thread.explore_key = Some(first.explore_key.clone());
                self.current_explore = Some(first);
            }
        }
    }

    pub fn available_explores(&self) -> &[ExploreRef] {
        &self.explores
    }

    pub fn current_explore(&self) -> Option<&ExploreRef> {
        self.current_explore.as_ref()
    }

    /// Switch to the explore with key `model:explore`. Switching away from a
    /// non-empty thread starts a new one.
    pub fn set_current_explore(&mut self, key: &str) -> Result<()> {
        let explore = match self.explores.iter().find(|e| e.explore_key == key) {
            Some(explore) => explore.clone(),
            None if self.explores.is_empty() => ExploreRef::from_key(key).ok_or_else(|| {
                AssistantError::Config(format!("Explore key must look like model:explore, got '{}'", key))
            })?,
            None => return Err(AssistantError::Config(format!("Unknown explore '{}'", key))),
        };

        let changed = self
            .current_explore
            .as_ref()
            .map(|e| e.explore_key != explore.explore_key)
            .unwrap_or(true);
        if changed {
            info!("Switching to explore {}", explore.explore_key);
            self.current_explore = Some(explore);
            if self.thread.is_empty() {
                self.thread.explore_key = self.current_explore.as_ref().map(|e| e.explore_key.clone());
            } else {
                self.new_thread();
            }
        }
        Ok(())
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn thread_mut(&mut self) -> &mut Thread {
        &mut self.thread
    }

    pub fn history(&self) -> &[Thread] {
        &self.history
    }

    /// Archive the current thread (if it has anything in it) and start fresh.
    pub fn new_thread(&mut self) {
        let explore_key = self.current_explore.as_ref().map(|e| e.explore_key.clone());
        let previous = std::mem::replace(&mut self.thread, Thread::new(explore_key));
        if !previous.is_empty() {
            debug!("Archived thread {} ({} messages)", previous.uuid, previous.messages.len());
            self.history.push(previous);
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Start a turn: refuse if one is running, then record the prompt.
    pub fn begin_turn(&mut self, text: &str) -> Result<()> {
        if self.in_flight {
            return Err(AssistantError::TurnInProgress);
        }
        self.in_flight = true;
        self.thread.prompt_list.push(text.to_string());
        self.thread.messages.push(Message::user(text));
        Ok(())
    }

    pub fn end_turn(&mut self) {
        self.in_flight = false;
    }

    pub fn push_message(&mut self, message: Message) {
        if let Some(params) = message.query_params() {
            self.thread.explore_params = Some(params.clone());
        }
        self.thread.messages.push(message);
    }
}
