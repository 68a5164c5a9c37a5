//! Conversation Memory (C9, spec §4.9).
//!
//! Grounded on `langgraph-prebuilt`'s `messages::{Message, trim_messages, TrimStrategy}`
//! utilities, generalized from a single flat history to a per-`person_id`
//! keyed append-only log with the selection criteria spec §4.9 names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::diagram::{NodeId, PersonId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub source_node_id: NodeId,
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, source_node_id: impl Into<NodeId>) -> Self {
        Self { role, content: content.into(), timestamp: Utc::now(), source_node_id: source_node_id.into(), meta: HashMap::new() }
    }
}

/// Selection criteria for [`ConversationStore::select`] (spec §4.9).
/// Advisory: handlers may bypass selection and use `history` directly.
#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    pub at_most: Option<usize>,
    pub keywords: Vec<String>,
    pub exclude_task_preview: bool,
}

impl SelectionCriteria {
    pub fn at_most(n: usize) -> Self {
        Self { at_most: Some(n), ..Default::default() }
    }
}

/// Per-person append-only message log.
///
/// RT2: append then select-all returns messages in insertion order — the
/// backing `Vec` only ever grows by `push`, so this holds by construction.
#[derive(Debug, Default)]
pub struct ConversationStore {
    logs: HashMap<PersonId, Vec<Message>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self { logs: HashMap::new() }
    }

    pub fn append(&mut self, person_id: &str, message: Message) {
        self.logs.entry(person_id.to_string()).or_default().push(message);
    }

    pub fn history(&self, person_id: &str) -> &[Message] {
        self.logs.get(person_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Advisory selection per the criteria in spec §4.9. Keyword filtering
    /// here is a literal substring match — semantic filtering via an LLM
    /// call is a handler-level concern layered on top of this store.
    pub fn select(&self, person_id: &str, criteria: &SelectionCriteria) -> Vec<Message> {
        let mut candidates: Vec<Message> = self.history(person_id).to_vec();

        if !criteria.keywords.is_empty() {
            candidates.retain(|m| {
                criteria.keywords.iter().any(|kw| m.content.to_lowercase().contains(&kw.to_lowercase()))
            });
        }

        if criteria.exclude_task_preview {
            candidates.retain(|m| !m.meta.get("is_task_preview").and_then(|v| v.as_bool()).unwrap_or(false));
        }

        if let Some(n) = criteria.at_most {
            if candidates.len() > n {
                let skip = candidates.len() - n;
                candidates = candidates.into_iter().skip(skip).collect();
            }
        }

        candidates
    }

    pub fn len(&self, person_id: &str) -> usize {
        self.history(person_id).len()
    }

    pub fn is_empty(&self, person_id: &str) -> bool {
        self.len(person_id) == 0
    }
}
