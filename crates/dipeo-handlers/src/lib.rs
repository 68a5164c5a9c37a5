//! Concrete node-kind handlers (spec §4.8). Each submodule under `kinds`
//! implements [`dipeo_core::NodeHandler`] for exactly one node kind;
//! [`build_default_registry`] wires all of them, including the
//! self-referential `sub_diagram` handler, into one [`HandlerRegistry`].

pub mod kinds;
pub mod registry_handle;
pub mod template_fn;

use std::sync::Arc;

use dipeo_core::conversation::ConversationStore;
use dipeo_core::event::EventBus;
use dipeo_core::HandlerRegistry;
use dipeo_services::ServiceRegistry;
use tokio::sync::Mutex;

use kinds::api_job::ApiJobHandler;
use kinds::code_job::CodeJobHandler;
use kinds::condition::ConditionHandler;
use kinds::db::DbHandler;
use kinds::endpoint::EndpointHandler;
use kinds::person_job::PersonJobHandler;
use kinds::start::StartHandler;
use kinds::sub_diagram::SubDiagramHandler;
use kinds::template_job::TemplateJobHandler;
use kinds::user_response::UserResponseHandler;
pub use kinds::user_response::PendingResponses;
pub use registry_handle::HandlerRegistryHandle;

/// Builds the registry with one handler per node kind (start, endpoint,
/// condition, person_job, sub_diagram, code_job, api_job, db, template_job,
/// user_response) and resolves the `sub_diagram` handler's self-reference.
pub fn build_default_registry(
    services: Arc<ServiceRegistry>,
    events: EventBus,
    conversations: Arc<Mutex<ConversationStore>>,
    pending_responses: Arc<PendingResponses>,
) -> Arc<HandlerRegistry> {
    let handle = HandlerRegistryHandle::new();

    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(StartHandler));
    registry.register(Arc::new(EndpointHandler::new(services.clone())));
    registry.register(Arc::new(ConditionHandler));
    registry.register(Arc::new(PersonJobHandler::new(services.clone(), conversations)));
    registry.register(Arc::new(SubDiagramHandler::new(services.clone(), handle.clone())));
    registry.register(Arc::new(CodeJobHandler));
    registry.register(Arc::new(ApiJobHandler::new()));
    registry.register(Arc::new(DbHandler::new(services.clone())));
    registry.register(Arc::new(TemplateJobHandler::new(services)));
    registry.register(Arc::new(UserResponseHandler::new(events, pending_responses)));

    let registry = Arc::new(registry);
    handle.set(registry.clone());
    registry
}
