//! Request-scoped trace id propagation.
//!
//! Every request gets a trace id (inbound `X-Request-ID` header or a fresh
//! UUID). The id is held in a tokio task-local so any code running on the
//! request task can resolve it without threading it through every function
//! signature. Spawned background tasks (the judge) capture the id explicitly
//! before the spawn.

use std::future::Future;

tokio::task_local! {
    static TRACE_ID: String;
}

/// Trace id for the current request task, or `"no-trace"` outside one.
pub fn current_trace_id() -> String {
    TRACE_ID
        .try_with(|id| id.clone())
        .unwrap_or_else(|_| "no-trace".to_string())
}

/// Run `fut` with the given trace id installed as the task-local.
pub async fn with_trace_id<F: Future>(id: String, fut: F) -> F::Output {
    TRACE_ID.scope(id, fut).await
}
