//! `person_job` handler (spec §4.8 "PersonJob"): the LLM-driving node kind.
//! Composes a prompt from the node's `first_only_prompt` (exec_count == 0)
//! or `default_prompt` (exec_count >= 1), calls the person's chat model via
//! the shared [`LlmClientCache`], appends both sides of the exchange to the
//! person's conversation history, and emits `token_usage`/loop-control
//! metadata the scheduler reads to decide whether to re-ready this node
//! (spec §4.7 "PersonJob re-ready exception").

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use dipeo_core::conversation::{ConversationStore, Message, Role, SelectionCriteria};
use dipeo_core::diagram::NodeKind;
use dipeo_core::error::{EngineError, Result};
use dipeo_core::{ActivationContext, Envelope, NodeHandler};
use dipeo_services::{ChatRequest, ServiceRegistry};

pub struct PersonJobHandler {
    services: Arc<ServiceRegistry>,
    conversations: Arc<Mutex<ConversationStore>>,
}

impl PersonJobHandler {
    pub fn new(services: Arc<ServiceRegistry>, conversations: Arc<Mutex<ConversationStore>>) -> Self {
        Self { services, conversations }
    }
}

#[async_trait]
impl NodeHandler for PersonJobHandler {
    fn kind(&self) -> NodeKind {
        "person_job".to_string()
    }

    async fn activate(&self, ctx: ActivationContext<'_>) -> Result<Envelope> {
        let person_id = ctx
            .node
            .props
            .0
            .get("person")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Configuration { node: ctx.node.id.clone(), message: "missing 'person' prop".into() })?;

        let person = ctx.diagram.persons.get(person_id).ok_or_else(|| EngineError::Configuration {
            node: ctx.node.id.clone(),
            message: format!("unknown person '{person_id}'"),
        })?;

        let prompt_key = if ctx.exec_count == 0 { "first_only_prompt" } else { "default_prompt" };
        let template = ctx
            .node
            .props
            .0
            .get(prompt_key)
            .and_then(|v| v.as_str())
            .or_else(|| ctx.node.props.0.get("default_prompt").and_then(|v| v.as_str()))
            .ok_or_else(|| EngineError::Configuration {
                node: ctx.node.id.clone(),
                message: format!("missing '{prompt_key}' prop"),
            })?;

        // The `first` handle carries input only on the node's first
        // activation (exec_count == 0); `default` carries it on every
        // subsequent one (spec §4.6 step 4 person_job merge policy).
        let input_text = ctx
            .inputs
            .get("first")
            .or_else(|| ctx.inputs.get("default"))
            .map(|e| e.body.clone())
            .unwrap_or(serde_json::Value::Null);
        let prompt = self
            .services
            .templates
            .render(template, &input_text)
            .map_err(|e| EngineError::Handler { node: ctx.node.id.clone(), message: e.to_string() })?;

        // Same prop the planner reads to decide this node's re-ready policy
        // (spec §4.5 "person_job with max_iteration > 1").
        let max_iterations = ctx.node.props.0.get("max_iteration").and_then(|v| v.as_u64());
        let at_most = ctx.node.props.0.get("memory_limit").and_then(|v| v.as_u64()).map(|n| n as usize);

        let history: Vec<(String, String)> = {
            let store = self.conversations.lock().await;
            let criteria = at_most.map(SelectionCriteria::at_most).unwrap_or_default();
            store
                .select(person_id, &criteria)
                .into_iter()
                .map(|m| (role_str(m.role).to_string(), m.content))
                .collect()
        };

        let api_key = self.services.api_keys.get(&person.api_key_ref).map_err(|e| EngineError::Configuration {
            node: ctx.node.id.clone(),
            message: e.to_string(),
        })?;
        let client = self
            .services
            .llm
            .get_or_create(&person.service, &person.model, api_key)
            .await
            .map_err(|e| EngineError::ExternalService { node: ctx.node.id.clone(), message: e.to_string() })?;

        let mut messages = history;
        messages.push(("user".to_string(), prompt.clone()));

        let response = client
            .complete(ChatRequest { system_prompt: person.system_prompt.clone(), messages, model: person.model.clone() })
            .await
            .map_err(|e| EngineError::ExternalService { node: ctx.node.id.clone(), message: e.to_string() })?;

        {
            let mut store = self.conversations.lock().await;
            store.append(person_id, Message::new(Role::User, prompt, ctx.node.id.clone()));
            store.append(person_id, Message::new(Role::Assistant, response.content.clone(), ctx.node.id.clone()));
        }

        let next_exec_count = ctx.exec_count + 1;
        let max_iterations_reached = max_iterations.map(|max| next_exec_count >= max).unwrap_or(true);

        let mut envelope = Envelope::raw_text(response.content).with_metadata(
            "token_usage",
            serde_json::json!({ "prompt_tokens": response.prompt_tokens, "completion_tokens": response.completion_tokens }),
        );
        if max_iterations_reached {
            envelope = envelope.with_metadata("loop_complete", true).with_metadata("max_iterations_reached", true);
        }
        Ok(envelope)
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}
