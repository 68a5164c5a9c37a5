//! LLM port (spec §4.2, §4.8 PersonJob). Provider SDK details are out of
//! scope (spec Non-goals) — handlers only see this trait.
//!
//! Grounded on `langgraph-core`'s `llm::traits::ChatModel`, trimmed to the
//! single `complete` call PersonJob needs (no streaming: spec §4.8 describes
//! only `llm.complete`) and a cached-by-`(provider, model, api_key_id)`
//! client pool (spec §5 "Shared-resource policy").

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<(String, String)>, // (role, content)
    pub model: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Provider-agnostic chat model, analogous to `langgraph-core::llm::traits::ChatModel`.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;
}

/// A deterministic provider used in tests and as a development fallback —
/// it never makes a network call.
pub struct EchoChatModel;

#[async_trait]
impl ChatModel for EchoChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let content = request.messages.last().map(|(_, c)| c.clone()).unwrap_or_default();
        let prompt_tokens = content.split_whitespace().count() as u64;
        Ok(ChatResponse { content, prompt_tokens, completion_tokens: prompt_tokens })
    }
}

struct CachedClient {
    model: Arc<dyn ChatModel>,
    created_at: Instant,
}

/// Read-mostly cache keyed by `(provider, model, api_key_id)` with a bounded
/// TTL to amortize client setup (spec §5).
pub struct LlmClientCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedClient>>,
    factory: Arc<dyn Fn(&str, &str, &str) -> Result<Arc<dyn ChatModel>> + Send + Sync>,
}

impl LlmClientCache {
    pub fn new(
        ttl: Duration,
        factory: impl Fn(&str, &str, &str) -> Result<Arc<dyn ChatModel>> + Send + Sync + 'static,
    ) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()), factory: Arc::new(factory) }
    }

    fn key(provider: &str, model: &str, api_key_id: &str) -> String {
        format!("{provider}:{model}:{api_key_id}")
    }

    pub async fn get_or_create(&self, provider: &str, model: &str, api_key_id: &str) -> Result<Arc<dyn ChatModel>> {
        let key = Self::key(provider, model, api_key_id);
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                if entry.created_at.elapsed() < self.ttl {
                    return Ok(entry.model.clone());
                }
            }
        }

        let client = (self.factory)(provider, model, api_key_id)?;
        self.entries
            .write()
            .await
            .insert(key, CachedClient { model: client.clone(), created_at: Instant::now() });
        Ok(client)
    }
}

pub fn echo_cache() -> LlmClientCache {
    LlmClientCache::new(Duration::from_secs(3600), |_provider, _model, _api_key_id| {
        Ok(Arc::new(EchoChatModel) as Arc<dyn ChatModel>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_model_returns_last_message() {
        let model = EchoChatModel;
        let response = model
            .complete(ChatRequest { system_prompt: None, messages: vec![("user".into(), "hello world".into())], model: "m".into() })
            .await
            .unwrap();
        assert_eq!(response.content, "hello world");
        assert_eq!(response.prompt_tokens, 2);
    }

    #[tokio::test]
    async fn cache_reuses_client_within_ttl() {
        let cache = LlmClientCache::new(Duration::from_secs(60), |_p, _m, _k| Ok(Arc::new(EchoChatModel) as Arc<dyn ChatModel>));
        let a = cache.get_or_create("openai", "gpt", "key1").await.unwrap();
        let b = cache.get_or_create("openai", "gpt", "key1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn cache_recreates_client_after_ttl_expires() {
        let cache = LlmClientCache::new(Duration::from_millis(1), |_p, _m, _k| Ok(Arc::new(EchoChatModel) as Arc<dyn ChatModel>));
        let a = cache.get_or_create("openai", "gpt", "key1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = cache.get_or_create("openai", "gpt", "key1").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
