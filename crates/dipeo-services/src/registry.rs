//! Service Registry (C2, spec §4.2).
//!
//! A typed bundle rather than a string-keyed dynamic lookup: the handlers
//! that need a given port hold an `Arc<ServiceRegistry>` and call the named
//! field directly, avoiding the dynamic-dispatch/global-state service
//! location an app-wide container would otherwise require.

use std::sync::Arc;

use crate::api_keys::ApiKeyStore;
use crate::filesystem::FilesystemService;
use crate::llm::LlmClientCache;
use crate::sub_diagram::SubDiagramLoader;
use crate::templates::TemplateService;

pub struct ServiceRegistry {
    pub llm: LlmClientCache,
    pub filesystem: FilesystemService,
    pub api_keys: ApiKeyStore,
    pub templates: TemplateService,
    pub sub_diagrams: Arc<dyn SubDiagramLoader>,
}

impl ServiceRegistry {
    pub fn new(
        llm: LlmClientCache,
        filesystem: FilesystemService,
        api_keys: ApiKeyStore,
        sub_diagrams: Arc<dyn SubDiagramLoader>,
    ) -> Self {
        Self { llm, filesystem, api_keys, templates: TemplateService::new(), sub_diagrams }
    }
}
