use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use switchyard_tools::{ToolError, ToolSchema};

use super::convert::ReturnValue;
use super::handler::{CallContext, HandlerFuture, ToolHandler};

/// A locally implemented tool with typed, schema-derived parameters.
#[async_trait]
pub trait LocalTool: Send + Sync + 'static {
    type Params: DeserializeOwned + JsonSchema + Send;
    type Output: Into<ReturnValue> + Send;

    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    async fn execute(
        &self,
        params: Self::Params,
        ctx: &CallContext,
    ) -> Result<Self::Output, ToolError>;

    fn schema() -> ToolSchema
    where
        Self: Sized,
    {
        let settings = schemars::generate::SchemaSettings::draft07().with(|s| {
            s.inline_subschemas = true;
        });
        let schema_gen = settings.into_generator();
        let input_schema = schema_gen.into_root_schema_for::<Self::Params>();

        ToolSchema::new(Self::NAME, Self::DESCRIPTION, input_schema.into())
    }
}

#[async_trait]
pub trait LocalToolErased: Send + Sync {
    async fn execute_erased(
        &self,
        arguments: Map<String, Value>,
        ctx: &CallContext,
    ) -> Result<ReturnValue, ToolError>;
}

#[async_trait]
impl<T> LocalToolErased for T
where
    T: LocalTool,
{
    async fn execute_erased(
        &self,
        arguments: Map<String, Value>,
        ctx: &CallContext,
    ) -> Result<ReturnValue, ToolError> {
        let typed_params: T::Params = serde_json::from_value(Value::Object(arguments))
            .map_err(|e| ToolError::invalid_params(T::NAME, e.to_string()))?;

        if ctx.is_cancelled() {
            return Err(ToolError::cancelled(T::NAME));
        }

        let output = self.execute(typed_params, ctx).await?;
        Ok(output.into())
    }
}

/// Handler wrapping a shared [`LocalToolErased`].
pub struct LocalToolHandler {
    tool: Arc<dyn LocalToolErased>,
}

impl LocalToolHandler {
    pub fn new(tool: Arc<dyn LocalToolErased>) -> Self {
        Self { tool }
    }
}

impl ToolHandler for LocalToolHandler {
    fn invoke(&self, arguments: Map<String, Value>, ctx: CallContext) -> HandlerFuture {
        let tool = Arc::clone(&self.tool);
        async move { tool.execute_erased(arguments, &ctx).await }.boxed()
    }
}
