//! Sub-diagram loader (spec §4.8 "SubDiagram"). Diagram authoring and
//! file-format parsing are out of scope; this resolves a reference to an
//! already-[`dipeo_core::CompiledDiagram`] handed to the process ahead of
//! time (e.g. sibling diagrams loaded alongside the parent at startup).
//! Actually running the child diagram is the `sub_diagram` handler's job —
//! it calls back into `dipeo_core::scheduler::run` with the resolved
//! diagram, keeping this crate free of a dependency cycle on the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use dipeo_core::CompiledDiagram;

use crate::error::{Result, ServiceError};

pub trait SubDiagramLoader: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<Arc<CompiledDiagram>>;
}

#[derive(Default)]
pub struct InMemorySubDiagramLoader {
    diagrams: HashMap<String, Arc<CompiledDiagram>>,
}

impl InMemorySubDiagramLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, reference: impl Into<String>, diagram: Arc<CompiledDiagram>) {
        self.diagrams.insert(reference.into(), diagram);
    }
}

impl SubDiagramLoader for InMemorySubDiagramLoader {
    fn resolve(&self, reference: &str) -> Result<Arc<CompiledDiagram>> {
        self.diagrams.get(reference).cloned().ok_or_else(|| ServiceError::SubDiagram(format!("unknown sub-diagram '{reference}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dipeo_core::diagram::DiagramMetadata;
    use std::collections::HashMap as Map;

    fn empty_diagram() -> Arc<CompiledDiagram> {
        Arc::new(CompiledDiagram {
            nodes: Map::new(),
            arrows: vec![],
            persons: Map::new(),
            api_keys: Map::new(),
            metadata: DiagramMetadata { format_version: "2.0".into(), ..Default::default() },
        })
    }

    #[test]
    fn resolves_registered_reference() {
        let mut loader = InMemorySubDiagramLoader::new();
        loader.register("child.json", empty_diagram());
        assert!(loader.resolve("child.json").is_ok());
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let loader = InMemorySubDiagramLoader::new();
        assert!(loader.resolve("missing.json").is_err());
    }
}
