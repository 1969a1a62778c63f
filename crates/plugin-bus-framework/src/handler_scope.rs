//! Tracks whether the caller is currently running inside a plugin event
//! handler. The runtime multiplexes many plugins' handlers over a shared
//! thread pool, so this must be task-scoped rather than thread-local.

use std::future::Future;

tokio::task_local! {
    static CURRENT_HANDLER: String;
}

/// Runs `fut` with the handler-scope flag set to `handler_name`. Bus calls
/// made anywhere within `fut` (including through further `.await` points on
/// other tasks spawned and joined inside it) observe [`current_handler`] as
/// `Some(handler_name)`.
pub async fn run_in_handler_scope<F: Future>(handler_name: impl Into<String>, fut: F) -> F::Output {
    CURRENT_HANDLER.scope(handler_name.into(), fut).await
}

/// The name of the handler the current task is running inside, or `None` if
/// the current task is not inside any handler scope.
pub fn current_handler() -> Option<String> {
    CURRENT_HANDLER.try_with(|name| name.clone()).ok()
}
