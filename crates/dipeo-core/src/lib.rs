//! Execution engine core: the compiled-diagram data model, planner,
//! scheduler, state store, event bus, and envelope/transform library.
//!
//! Diagram authoring and file-format parsing are out of scope (spec
//! Non-goals) — this crate consumes an already-[`diagram::CompiledDiagram`].

pub mod cancellation;
pub mod conversation;
pub mod diagram;
pub mod envelope;
pub mod error;
pub mod event;
pub mod handler;
pub mod input_resolution;
pub mod planner;
pub mod retry;
pub mod scheduler;
pub mod state;

pub use cancellation::CancellationToken;
pub use diagram::CompiledDiagram;
pub use envelope::Envelope;
pub use error::{EngineError, Result};
pub use event::{Event, EventBus, EventKind};
pub use handler::{ActivationContext, HandlerRegistry, NodeHandler};
pub use scheduler::{run, RunOptions};
pub use state::{ExecutionState, ExecutionStateStore, ExecutionStatus, NodeStatus};
