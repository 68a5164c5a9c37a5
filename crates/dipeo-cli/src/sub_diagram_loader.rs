//! Filesystem-backed [`SubDiagramLoader`] (spec §4.8 "SubDiagram"): resolves
//! a `props.diagram` reference to a sibling compiled-diagram JSON file next
//! to the parent diagram. Loading is synchronous (the trait is not async)
//! and diagrams are small, so a blocking read is the right tool here — the
//! same reasoning `dipeo_services::filesystem::FilesystemService` uses for
//! its own I/O.

use std::path::PathBuf;
use std::sync::Arc;

use dipeo_core::CompiledDiagram;
use dipeo_services::{Result, ServiceError, SubDiagramLoader};

pub struct FileSubDiagramLoader {
    base_dir: PathBuf,
}

impl FileSubDiagramLoader {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }
}

impl SubDiagramLoader for FileSubDiagramLoader {
    fn resolve(&self, reference: &str) -> Result<Arc<CompiledDiagram>> {
        let path = self.base_dir.join(reference);
        let bytes = std::fs::read(&path)
            .map_err(|e| ServiceError::SubDiagram(format!("failed to read '{}': {e}", path.display())))?;
        let diagram: CompiledDiagram = serde_json::from_slice(&bytes)
            .map_err(|e| ServiceError::SubDiagram(format!("invalid diagram JSON in '{}': {e}", path.display())))?;
        Ok(Arc::new(diagram))
    }
}
