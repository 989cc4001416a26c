use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::Stream;
use jsonschema::JSONSchema;
use serde_json::{Map, Value};
use switchyard_tools::{ToolError, ToolSchema};
use tracing::{debug, warn};

use super::convert::ReturnValue;
use super::error::{RegistryError, ResolveError};
use super::handler::{
    AsyncHandler, CallContext, HandlerFuture, StreamHandler, SyncHandler, ToolHandler,
};
use super::local_tool::{LocalTool, LocalToolHandler};

/// Group every tool lands in unless told otherwise. Always exists.
pub const DEFAULT_GROUP: &str = "basic";

/// Everything needed to add one local tool to a [`ToolRegistry`].
pub struct ToolRegistration {
    schema: ToolSchema,
    handler: Arc<dyn ToolHandler>,
    groups: Vec<String>,
    preset_arguments: Map<String, Value>,
}

impl ToolRegistration {
    pub fn new(schema: ToolSchema, handler: impl ToolHandler) -> Self {
        Self {
            schema,
            handler: Arc::new(handler),
            groups: Vec::new(),
            preset_arguments: Map::new(),
        }
    }

    pub fn local<T: LocalTool>(tool: T) -> Self {
        let schema = T::schema();
        Self::new(schema, LocalToolHandler::new(Arc::new(tool)))
    }

    pub fn sync<F, R, E>(schema: ToolSchema, func: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Result<R, E> + Send + Sync + 'static,
        R: Into<ReturnValue> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        Self::new(schema, SyncHandler::new(func))
    }

    pub fn deferred<F, Fut, R, E>(schema: ToolSchema, func: F) -> Self
    where
        F: Fn(Map<String, Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Into<ReturnValue> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        Self::new(schema, AsyncHandler::new(func))
    }

    pub fn streaming<F, S, R, E>(schema: ToolSchema, func: F) -> Self
    where
        F: Fn(Map<String, Value>, CallContext) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<R, E>> + Send + 'static,
        R: Into<ReturnValue> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        Self::new(schema, StreamHandler::new(func))
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// Arguments merged into every call, hidden from the advertised schema.
    pub fn with_preset_arguments(mut self, presets: Map<String, Value>) -> Self {
        self.preset_arguments = presets;
        self
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }
}

/// A registered local tool as seen by the dispatcher.
pub struct ResolvedTool {
    schema: ToolSchema,
    handler: Arc<dyn ToolHandler>,
    groups: BTreeSet<String>,
    preset_arguments: Map<String, Value>,
    validator: JSONSchema,
}

impl fmt::Debug for ResolvedTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTool")
            .field("name", &self.schema.name)
            .field("groups", &self.groups)
            .field("presets", &self.preset_arguments.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ResolvedTool {
    /// Schema as advertised, with preset arguments removed.
    pub fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(String::as_str)
    }

    /// Merge presets over the caller's arguments and validate the result.
    pub fn prepare_arguments(
        &self,
        arguments: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ToolError> {
        let mut merged = arguments.clone();
        for (key, value) in &self.preset_arguments {
            merged.insert(key.clone(), value.clone());
        }

        let instance = Value::Object(merged);
        if let Err(errors) = self.validator.validate(&instance) {
            let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(ToolError::invalid_params(
                &self.schema.name,
                messages.join("; "),
            ));
        }

        match instance {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    pub fn invoke(&self, arguments: Map<String, Value>, ctx: CallContext) -> HandlerFuture {
        self.handler.invoke(arguments, ctx)
    }
}

/// A named set of tools that can be switched on and off together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationGroup {
    pub name: String,
    pub description: String,
    pub active: bool,
    pub tools: BTreeSet<String>,
}

#[derive(Clone)]
struct RegistrySnapshot {
    tools: HashMap<String, Arc<ResolvedTool>>,
    groups: BTreeMap<String, ActivationGroup>,
}

impl RegistrySnapshot {
    fn is_callable(&self, tool: &ResolvedTool) -> bool {
        tool.groups
            .iter()
            .any(|g| self.groups.get(g).is_some_and(|group| group.active))
    }

    fn group_mut(&mut self, name: &str) -> Result<&mut ActivationGroup, RegistryError> {
        self.groups
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownGroup(name.to_string()))
    }
}

/// Local tools and their activation groups.
///
/// Writers are serialized and publish a fresh snapshot; readers only ever
/// clone the current `Arc`, so they never observe a partial update.
pub struct ToolRegistry {
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    writer: Mutex<()>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.current();
        f.debug_struct("ToolRegistry")
            .field("tools", &snapshot.tools.len())
            .field("groups", &snapshot.groups.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(
            DEFAULT_GROUP.to_string(),
            ActivationGroup {
                name: DEFAULT_GROUP.to_string(),
                description: "Tools that are always available".to_string(),
                active: true,
                tools: BTreeSet::new(),
            },
        );
        Self {
            snapshot: RwLock::new(Arc::new(RegistrySnapshot {
                tools: HashMap::new(),
                groups,
            })),
            writer: Mutex::new(()),
        }
    }

    fn current(&self) -> Arc<RegistrySnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut RegistrySnapshot) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = RegistrySnapshot::clone(&self.current());
        let out = change(&mut next)?;
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(out)
    }

    pub fn register(&self, registration: ToolRegistration) -> Result<(), RegistryError> {
        let ToolRegistration {
            schema,
            handler,
            groups,
            preset_arguments,
        } = registration;
        let name = schema.name.clone();

        let full_schema = schema.input_schema.to_value();
        let validator =
            JSONSchema::compile(&full_schema).map_err(|e| RegistryError::InvalidSchema {
                tool_name: name.clone(),
                message: e.to_string(),
            })?;

        let mut groups: BTreeSet<String> = groups.into_iter().collect();
        if groups.is_empty() {
            groups.insert(DEFAULT_GROUP.to_string());
        }

        let advertised = ToolSchema {
            input_schema: schema
                .input_schema
                .without_properties(preset_arguments.keys().map(String::as_str)),
            ..schema
        };

        let tool = Arc::new(ResolvedTool {
            schema: advertised,
            handler,
            groups: groups.clone(),
            preset_arguments,
            validator,
        });

        self.mutate(|snapshot| {
            if snapshot.tools.contains_key(&name) {
                return Err(RegistryError::DuplicateTool(name.clone()));
            }
            for group in &groups {
                snapshot.group_mut(group)?.tools.insert(name.clone());
            }
            snapshot.tools.insert(name.clone(), tool);
            Ok(())
        })?;

        debug!(target: "tool_registry", tool = %name, groups = ?groups, "Registered tool");
        Ok(())
    }

    /// Remove a tool. Returns `false` if it was not registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.mutate(|snapshot| {
            if snapshot.tools.remove(name).is_none() {
                return Ok(false);
            }
            for group in snapshot.groups.values_mut() {
                group.tools.remove(name);
            }
            Ok(true)
        });
        matches!(removed, Ok(true))
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<ResolvedTool>, ResolveError> {
        let snapshot = self.current();
        let tool = snapshot.tools.get(name).ok_or(ResolveError::NotFound)?;
        if snapshot.is_callable(tool) {
            Ok(Arc::clone(tool))
        } else {
            Err(ResolveError::NotActive)
        }
    }

    /// Whether `name` is registered, active or not.
    pub fn contains(&self, name: &str) -> bool {
        self.current().tools.contains_key(name)
    }

    pub fn create_group(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        active: bool,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let description = description.into();
        self.mutate(|snapshot| {
            if snapshot.groups.contains_key(&name) {
                return Err(RegistryError::DuplicateGroup(name.clone()));
            }
            snapshot.groups.insert(
                name.clone(),
                ActivationGroup {
                    name: name.clone(),
                    description,
                    active,
                    tools: BTreeSet::new(),
                },
            );
            Ok(())
        })?;
        debug!(target: "tool_registry", group = %name, active, "Created group");
        Ok(())
    }

    pub fn activate(&self, group: &str) -> Result<(), RegistryError> {
        self.set_active(group, true)
    }

    pub fn deactivate(&self, group: &str) -> Result<(), RegistryError> {
        self.set_active(group, false)
    }

    /// Apply several activation changes as one swap. Nothing changes if any
    /// group is unknown.
    pub fn set_groups_active(&self, changes: &BTreeMap<String, bool>) -> Result<(), RegistryError> {
        self.mutate(|snapshot| {
            for (group, active) in changes {
                snapshot.group_mut(group)?.active = *active;
            }
            Ok(())
        })?;
        debug!(target: "tool_registry", changes = ?changes, "Changed group activation");
        Ok(())
    }

    fn set_active(&self, group: &str, active: bool) -> Result<(), RegistryError> {
        if self.current().groups.get(group).map(|g| g.active) == Some(active) {
            return Ok(());
        }
        self.mutate(|snapshot| {
            snapshot.group_mut(group)?.active = active;
            Ok(())
        })?;
        debug!(target: "tool_registry", group, active, "Changed group activation");
        Ok(())
    }

    pub fn groups(&self) -> Vec<ActivationGroup> {
        self.current().groups.values().cloned().collect()
    }

    pub fn active_groups(&self) -> Vec<String> {
        self.current()
            .groups
            .values()
            .filter(|g| g.active)
            .map(|g| g.name.clone())
            .collect()
    }

    /// Make exactly the named groups active. Unknown names are skipped.
    pub fn restore_active_groups(&self, names: &[String]) {
        let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        let result = self.mutate(|snapshot| {
            for name in &wanted {
                if !snapshot.groups.contains_key(*name) {
                    warn!(target: "tool_registry", group = %name, "Ignoring unknown group in saved state");
                }
            }
            for group in snapshot.groups.values_mut() {
                group.active = wanted.contains(group.name.as_str());
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!(target: "tool_registry", "Failed to restore groups: {e}");
        }
    }

    /// Advertised schemas, sorted by name.
    pub fn list_schemas(&self, active_only: bool) -> Vec<ToolSchema> {
        let snapshot = self.current();
        let mut schemas: Vec<ToolSchema> = snapshot
            .tools
            .values()
            .filter(|tool| !active_only || snapshot.is_callable(tool))
            .map(|tool| tool.schema.clone())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}
