use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use serde_json::{Map, Value, json};
use switchyard_tools::{InputSchema, ToolSchema};

use super::registry::{DEFAULT_GROUP, ToolRegistration, ToolRegistry};

pub const GROUP_CONTROL_TOOL: &str = "reset_equipped_tools";

/// Model-callable tool that switches activation groups on and off.
pub(crate) fn registration(registry: &Arc<ToolRegistry>) -> ToolRegistration {
    let mut properties = Map::new();
    for group in registry.groups() {
        if group.name == DEFAULT_GROUP {
            continue;
        }
        let description = if group.description.is_empty() {
            format!("Enable the {} tools", group.name)
        } else {
            group.description.clone()
        };
        properties.insert(
            group.name.clone(),
            json!({"type": "boolean", "description": description}),
        );
    }

    let schema = ToolSchema::new(
        GROUP_CONTROL_TOOL,
        "Choose which groups of tools are equipped. Pass true to enable a group and false to disable it. Returns the groups that are active afterwards.",
        InputSchema::object(properties, Vec::new()),
    );

    let registry = Arc::downgrade(registry);
    ToolRegistration::deferred(schema, move |arguments, _ctx| {
        futures::future::ready(apply(&registry, &arguments))
    })
}

fn apply(registry: &Weak<ToolRegistry>, arguments: &Map<String, Value>) -> Result<String, String> {
    let registry = registry
        .upgrade()
        .ok_or_else(|| "tool registry is no longer available".to_string())?;

    let mut changes = BTreeMap::new();
    for (group, wanted) in arguments {
        if group == DEFAULT_GROUP {
            return Err(format!("group {DEFAULT_GROUP} is always equipped"));
        }
        let active = wanted
            .as_bool()
            .ok_or_else(|| format!("expected true or false for group {group}"))?;
        changes.insert(group.clone(), active);
    }

    registry
        .set_groups_active(&changes)
        .map_err(|e| e.to_string())?;

    Ok(format!(
        "Active groups: {}",
        registry.active_groups().join(", ")
    ))
}
