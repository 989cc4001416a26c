use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which remote tools a client exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "mode", content = "tools", rename_all = "snake_case")]
pub enum ToolFilter {
    #[default]
    All,
    Include(HashSet<String>),
    Exclude(HashSet<String>),
}

impl ToolFilter {
    pub fn should_include(&self, tool_name: &str) -> bool {
        match self {
            ToolFilter::All => true,
            ToolFilter::Include(names) => names.contains(tool_name),
            ToolFilter::Exclude(names) => !names.contains(tool_name),
        }
    }
}
