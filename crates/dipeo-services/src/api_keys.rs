//! API key store (spec §4.2, §6 "an API-key store file path").
//!
//! The store itself is a read-only lookup over whatever the host process
//! loaded from the key file at startup; reloading that file is a host
//! concern, not this crate's.

use std::collections::HashMap;

use crate::error::{Result, ServiceError};

#[derive(Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, String>,
}

impl ApiKeyStore {
    pub fn new(keys: HashMap<String, String>) -> Self {
        Self { keys }
    }

    pub fn get(&self, api_key_id: &str) -> Result<&str> {
        self.keys.get(api_key_id).map(String::as_str).ok_or_else(|| ServiceError::ApiKeyNotFound(api_key_id.to_string()))
    }
}
