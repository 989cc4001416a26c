use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use switchyard_tools::ToolSchema;

pub type ToolMap = HashMap<String, ToolSchema>;

/// Remote tool schemas by name, replaced as a whole.
///
/// `None` means nothing has been fetched yet, which is different from a
/// server that advertises no tools.
#[derive(Debug, Default)]
pub struct ToolCache {
    tools: RwLock<Option<Arc<ToolMap>>>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<Arc<ToolMap>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, tools: ToolMap) -> Arc<ToolMap> {
        let tools = Arc::new(tools);
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = Some(tools.clone());
        tools
    }

    pub fn clear(&self) {
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().is_some_and(|tools| tools.contains_key(name))
    }

    pub fn is_populated(&self) -> bool {
        self.snapshot().is_some()
    }

    pub fn len(&self) -> usize {
        self.snapshot().map_or(0, |tools| tools.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached schemas sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .snapshot()
            .map(|tools| tools.values().cloned().collect())
            .unwrap_or_default();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}
