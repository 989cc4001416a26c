use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use serde_json::{Map, Value};
use switchyard_tools::ToolError;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::convert::ReturnValue;

pub type HandlerFuture = BoxFuture<'static, Result<ReturnValue, ToolError>>;

/// Per-call context handed to every handler.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub tool_call_id: String,
    pub tool_name: String,
    pub cancellation_token: CancellationToken,
    pub workers: WorkerPool,
}

impl CallContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

/// Bounded pool for synchronous handler bodies.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `job` on the blocking thread pool once a slot is free.
    pub async fn run_blocking<F, T>(&self, tool_name: &str, job: F) -> Result<T, ToolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ToolError::internal(format!("worker pool closed: {e}")))?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });

        handle.await.map_err(|e| {
            if e.is_panic() {
                ToolError::execution(tool_name, "handler panicked")
            } else {
                ToolError::cancelled(tool_name)
            }
        })
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_BLOCKING_CALLS)
    }
}

/// The single execution contract every tool shape is adapted to.
pub trait ToolHandler: Send + Sync + 'static {
    fn invoke(&self, arguments: Map<String, Value>, ctx: CallContext) -> HandlerFuture;
}

/// Adapts a plain blocking function.
pub struct SyncHandler<F> {
    func: Arc<F>,
}

impl<F> SyncHandler<F> {
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

impl<F, R, E> ToolHandler for SyncHandler<F>
where
    F: Fn(Map<String, Value>) -> Result<R, E> + Send + Sync + 'static,
    R: Into<ReturnValue> + Send + 'static,
    E: Display + Send + 'static,
{
    fn invoke(&self, arguments: Map<String, Value>, ctx: CallContext) -> HandlerFuture {
        let func = Arc::clone(&self.func);
        async move {
            let name = ctx.tool_name.clone();
            let outcome = ctx
                .workers
                .run_blocking(&ctx.tool_name, move || func(arguments))
                .await?;
            outcome
                .map(Into::into)
                .map_err(|e| ToolError::execution(name, e.to_string()))
        }
        .boxed()
    }
}

/// Adapts an async function.
pub struct AsyncHandler<F> {
    func: F,
}

impl<F> AsyncHandler<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut, R, E> ToolHandler for AsyncHandler<F>
where
    F: Fn(Map<String, Value>, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Into<ReturnValue> + Send + 'static,
    E: Display + Send + 'static,
{
    fn invoke(&self, arguments: Map<String, Value>, ctx: CallContext) -> HandlerFuture {
        let name = ctx.tool_name.clone();
        let fut = (self.func)(arguments, ctx);
        async move {
            fut.await
                .map(Into::into)
                .map_err(|e| ToolError::execution(name, e.to_string()))
        }
        .boxed()
    }
}

/// Adapts a function producing a stream; the last item is the result and an
/// empty stream counts as [`ReturnValue::Void`].
pub struct StreamHandler<F> {
    func: F,
}

impl<F> StreamHandler<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, S, R, E> ToolHandler for StreamHandler<F>
where
    F: Fn(Map<String, Value>, CallContext) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<R, E>> + Send + 'static,
    R: Into<ReturnValue> + Send + 'static,
    E: Display + Send + 'static,
{
    fn invoke(&self, arguments: Map<String, Value>, ctx: CallContext) -> HandlerFuture {
        let name = ctx.tool_name.clone();
        let stream = (self.func)(arguments, ctx);
        async move {
            let mut stream = std::pin::pin!(stream);
            let mut last = None;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(value) => last = Some(value),
                    Err(e) => return Err(ToolError::execution(name, e.to_string())),
                }
            }
            Ok(last.map_or(ReturnValue::Void, Into::into))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::convert::ResultConverter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use switchyard_tools::ContentBlock;

    fn ctx(name: &str, workers: WorkerPool) -> CallContext {
        CallContext {
            tool_call_id: "call-1".to_string(),
            tool_name: name.to_string(),
            cancellation_token: CancellationToken::new(),
            workers,
        }
    }

    fn args(value: serde_json::Value) -> Map<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn render(value: ReturnValue) -> Vec<ContentBlock> {
        ResultConverter::new().convert(value)
    }

    #[tokio::test]
    async fn test_sync_handler_runs_on_pool() {
        let handler = SyncHandler::new(|args: Map<String, Value>| {
            let a = args.get("a").and_then(Value::as_i64).unwrap_or_default();
            let b = args.get("b").and_then(Value::as_i64).unwrap_or_default();
            Ok::<_, String>(a + b)
        });
        let value = handler
            .invoke(
                args(serde_json::json!({"a": 10, "b": 20})),
                ctx("add", WorkerPool::new(2)),
            )
            .await
            .unwrap();
        assert_eq!(render(value), vec![ContentBlock::text("30")]);
    }

    #[tokio::test]
    async fn test_sync_handler_error_keeps_message() {
        let handler =
            SyncHandler::new(|_args: Map<String, Value>| Err::<(), _>("disk on fire".to_string()));
        let err = handler
            .invoke(Map::new(), ctx("burn", WorkerPool::new(1)))
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::execution("burn", "disk on fire"));
    }

    #[tokio::test]
    async fn test_sync_handler_panic_becomes_execution_error() {
        let handler = SyncHandler::new(|_args: Map<String, Value>| -> Result<(), String> {
            panic!("oops");
        });
        let err = handler
            .invoke(Map::new(), ctx("boom", WorkerPool::new(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_pool_bounds_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(2);

        let jobs = (0..6).map(|_| {
            let running = running.clone();
            let peak = peak.clone();
            let pool = pool.clone();
            async move {
                pool.run_blocking("sleepy", move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }
        });
        let results = futures::future::join_all(jobs).await;

        assert!(results.iter().all(Result::is_ok));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_async_handler() {
        let handler = AsyncHandler::new(|args: Map<String, Value>, ctx: CallContext| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let city = args.get("city").and_then(Value::as_str).unwrap_or("nowhere");
            Ok::<_, String>(format!("{} via {}", city, ctx.tool_call_id))
        });
        let value = handler
            .invoke(
                args(serde_json::json!({"city": "Lima"})),
                ctx("weather", WorkerPool::default()),
            )
            .await
            .unwrap();
        assert_eq!(render(value), vec![ContentBlock::text("Lima via call-1")]);
    }

    #[tokio::test]
    async fn test_stream_handler_keeps_last_item() {
        let handler = StreamHandler::new(|_args: Map<String, Value>, _ctx: CallContext| {
            futures::stream::iter(vec![Ok::<_, String>(1), Ok(2), Ok(3)])
        });
        let value = handler
            .invoke(Map::new(), ctx("count", WorkerPool::default()))
            .await
            .unwrap();
        assert_eq!(render(value), vec![ContentBlock::text("3")]);
    }

    #[tokio::test]
    async fn test_empty_stream_is_void() {
        let handler = StreamHandler::new(|_args: Map<String, Value>, _ctx: CallContext| {
            futures::stream::iter(Vec::<Result<i64, String>>::new())
        });
        let value = handler
            .invoke(Map::new(), ctx("quiet", WorkerPool::default()))
            .await
            .unwrap();
        assert_eq!(render(value), vec![ContentBlock::text("Done")]);
    }

    #[tokio::test]
    async fn test_stream_error_stops_iteration() {
        let handler = StreamHandler::new(|_args: Map<String, Value>, _ctx: CallContext| {
            futures::stream::iter(vec![Ok(1), Err("lost connection".to_string()), Ok(3)])
        });
        let err = handler
            .invoke(Map::new(), ctx("flaky", WorkerPool::default()))
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::execution("flaky", "lost connection"));
    }
}
