//! Middleware adapter and chain runner.
//!
//! Every middleware is registered with an explicit [`Scope`] and
//! [`MiddlewareKind`]. The kind is fixed at construction: regular stages run
//! while no failure is pending, error stages run only when one is. A stage
//! returning `Ok(())` continues the chain; returning `Err` forwards a failure to
//! the next error stage.
//!
//! A stage whose future never completes stalls its request. The runner has no
//! timeout of its own.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::api::error::Failure;
use crate::api::exchange::Exchange;

/// Where a middleware sits relative to the validated handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Before,
    After,
}

/// How a middleware takes part in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MiddlewareKind {
    /// Runs while no failure is pending.
    Regular,
    /// Runs only with a pending failure, which it receives by value.
    ErrorStage,
}

#[async_trait]
pub trait RequestMiddleware: Send + Sync + 'static {
    async fn handle(&self, ex: &mut Exchange) -> Result<(), Failure>;
}

#[async_trait]
pub trait ErrorMiddleware: Send + Sync + 'static {
    /// Returning `Ok(())` consumes the failure.
    async fn handle(&self, error: Failure, ex: &mut Exchange) -> Result<(), Failure>;
}

#[derive(Clone)]
enum Stage {
    Regular(Arc<dyn RequestMiddleware>),
    ErrorStage(Arc<dyn ErrorMiddleware>),
}

/// A registered middleware entry. Cloning shares the underlying handler.
#[derive(Clone)]
pub struct Middleware {
    name: Option<String>,
    scope: Scope,
    stage: Stage,
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("kind", &self.kind())
            .finish()
    }
}

struct SyncFn<F>(F);
struct AsyncFn<F>(F);

#[async_trait]
impl<F> RequestMiddleware for SyncFn<F>
where
    F: Fn(&mut Exchange) -> Result<(), Failure> + Send + Sync + 'static,
{
    async fn handle(&self, ex: &mut Exchange) -> Result<(), Failure> {
        (self.0)(ex)
    }
}

#[async_trait]
impl<F> ErrorMiddleware for SyncFn<F>
where
    F: Fn(Failure, &mut Exchange) -> Result<(), Failure> + Send + Sync + 'static,
{
    async fn handle(&self, error: Failure, ex: &mut Exchange) -> Result<(), Failure> {
        (self.0)(error, ex)
    }
}

#[async_trait]
impl<F> RequestMiddleware for AsyncFn<F>
where
    F: for<'a> Fn(&'a mut Exchange) -> BoxFuture<'a, Result<(), Failure>> + Send + Sync + 'static,
{
    async fn handle(&self, ex: &mut Exchange) -> Result<(), Failure> {
        (self.0)(ex).await
    }
}

#[async_trait]
impl<F> ErrorMiddleware for AsyncFn<F>
where
    F: for<'a> Fn(Failure, &'a mut Exchange) -> BoxFuture<'a, Result<(), Failure>>
        + Send
        + Sync
        + 'static,
{
    async fn handle(&self, error: Failure, ex: &mut Exchange) -> Result<(), Failure> {
        (self.0)(error, ex).await
    }
}

impl Middleware {
    pub fn regular(scope: Scope, handler: impl RequestMiddleware) -> Self {
        Self {
            name: None,
            scope,
            stage: Stage::Regular(Arc::new(handler)),
        }
    }

    pub fn error_stage(scope: Scope, handler: impl ErrorMiddleware) -> Self {
        Self {
            name: None,
            scope,
            stage: Stage::ErrorStage(Arc::new(handler)),
        }
    }

    /// Regular middleware from a synchronous closure.
    pub fn from_fn<F>(scope: Scope, f: F) -> Self
    where
        F: Fn(&mut Exchange) -> Result<(), Failure> + Send + Sync + 'static,
    {
        Self::regular(scope, SyncFn(f))
    }

    /// Error-stage middleware from a synchronous closure.
    pub fn error_fn<F>(scope: Scope, f: F) -> Self
    where
        F: Fn(Failure, &mut Exchange) -> Result<(), Failure> + Send + Sync + 'static,
    {
        Self::error_stage(scope, SyncFn(f))
    }

    /// Regular middleware from a closure returning a boxed future:
    ///
    /// ```ignore
    /// Middleware::from_async_fn(Scope::Before, |ex| Box::pin(async move {
    ///     ex.request.extensions.insert(load_user(&ex.request).await?);
    ///     Ok(())
    /// }))
    /// ```
    pub fn from_async_fn<F>(scope: Scope, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Exchange) -> BoxFuture<'a, Result<(), Failure>>
            + Send
            + Sync
            + 'static,
    {
        Self::regular(scope, AsyncFn(f))
    }

    /// Error-stage middleware from a closure returning a boxed future.
    pub fn error_async_fn<F>(scope: Scope, f: F) -> Self
    where
        F: for<'a> Fn(Failure, &'a mut Exchange) -> BoxFuture<'a, Result<(), Failure>>
            + Send
            + Sync
            + 'static,
    {
        Self::error_stage(scope, AsyncFn(f))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn kind(&self) -> MiddlewareKind {
        match self.stage {
            Stage::Regular(_) => MiddlewareKind::Regular,
            Stage::ErrorStage(_) => MiddlewareKind::ErrorStage,
        }
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Runs this stage given the chain's pending failure and returns the failure
    /// (if any) to hand to the next stage.
    pub(crate) async fn invoke(
        &self,
        pending: Option<Failure>,
        ex: &mut Exchange,
    ) -> Option<Failure> {
        let fut = match (&self.stage, pending) {
            (Stage::Regular(_), Some(err)) => return Some(err),
            (Stage::ErrorStage(_), None) => return None,
            (_, pending) if ex.is_finalized() => {
                tracing::info!(
                    middleware = self.label(),
                    dropped_failure = pending.is_some(),
                    "Exiting middleware early, response already sent"
                );
                return None;
            }
            (Stage::Regular(h), None) => h.handle(ex),
            (Stage::ErrorStage(h), Some(err)) => h.handle(err, ex),
        };

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(panic) => Some(Failure::msg(format!(
                "middleware {} panicked: {}",
                self.label(),
                panic_message(panic.as_ref())
            ))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Runs `stages` in order, threading the pending failure between them.
/// Returns the failure still pending after the last stage.
pub async fn run_chain(
    stages: &[Middleware],
    ex: &mut Exchange,
    initial: Option<Failure>,
) -> Option<Failure> {
    let mut pending = initial;
    for stage in stages {
        pending = stage.invoke(pending, ex).await;
    }
    pending
}

/// Global BEFORE stage logging method, path, status and latency once the
/// response is complete.
pub fn request_logger() -> Middleware {
    Middleware::from_fn(Scope::Before, |ex| {
        let started = Instant::now();
        ex.on_finish(move |status, req| {
            tracing::info!(
                method = %req.method,
                path = %req.path(),
                status = status.as_u16(),
                latency_ms = started.elapsed().as_millis() as u64,
                request_id = req.request_id.as_deref().unwrap_or(""),
                "request completed"
            );
        });
        Ok(())
    })
    .named("RequestLogger")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::{classify, ApiError, ErrorKind};
    use crate::api::exchange::RequestContext;
    use http::StatusCode;
    use parking_lot::Mutex;

    fn exchange() -> Exchange {
        Exchange::new(RequestContext::default())
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Middleware {
        let log = log.clone();
        Middleware::from_fn(Scope::Before, move |_| {
            log.lock().push(tag);
            Ok(())
        })
    }

    struct Delayed(Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl RequestMiddleware for Delayed {
        async fn handle(&self, _ex: &mut Exchange) -> Result<(), Failure> {
            tokio::task::yield_now().await;
            self.0.lock().push("async");
            Ok(())
        }
    }

    #[tokio::test]
    async fn mixed_sync_and_async_stages_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stages = vec![
            recorder(&log, "a"),
            Middleware::regular(Scope::Before, Delayed(log.clone())),
            recorder(&log, "b"),
        ];

        let mut ex = exchange();
        assert!(run_chain(&stages, &mut ex, None).await.is_none());
        assert_eq!(*log.lock(), vec!["a", "async", "b"]);
    }

    #[tokio::test]
    async fn failure_skips_regular_stages_until_error_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = log.clone();
        let stages = vec![
            Middleware::from_fn(Scope::Before, |_| Err(ApiError::forbidden().into())),
            recorder(&log, "skipped"),
            Middleware::error_fn(Scope::After, move |err, _| {
                seen.lock().push("error-stage");
                assert_eq!(classify(&err).kind, ErrorKind::Forbidden);
                Ok(())
            }),
            recorder(&log, "after-recovery"),
        ];

        let mut ex = exchange();
        assert!(run_chain(&stages, &mut ex, None).await.is_none());
        assert_eq!(*log.lock(), vec!["error-stage", "after-recovery"]);
    }

    #[tokio::test]
    async fn error_stage_is_skipped_without_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = log.clone();
        let stages = vec![Middleware::error_fn(Scope::After, move |err, _| {
            seen.lock().push("error-stage");
            Err(err)
        })];

        let mut ex = exchange();
        assert!(run_chain(&stages, &mut ex, None).await.is_none());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn finalized_response_short_circuits_remaining_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stages = vec![
            Middleware::from_fn(Scope::Before, |ex| {
                ex.set_status(StatusCode::NO_CONTENT);
                ex.send("");
                Ok(())
            }),
            recorder(&log, "never"),
        ];

        let mut ex = exchange();
        assert!(run_chain(&stages, &mut ex, None).await.is_none());
        assert!(log.lock().is_empty());
        assert_eq!(ex.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn panics_become_internal_failures() {
        let stages =
            vec![Middleware::from_fn(Scope::Before, |_| panic!("boom")).named("Exploding")];

        let mut ex = exchange();
        let failure = run_chain(&stages, &mut ex, None).await.expect("failure");
        assert_eq!(classify(&failure).kind, ErrorKind::InternalServer);
        assert!(failure.to_string().contains("Exploding"));
        assert!(failure.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn async_fn_stage_can_mutate_request() {
        let stages = vec![Middleware::from_async_fn(Scope::Before, |ex| {
            Box::pin(async move {
                ex.request.extensions.insert(7u32);
                Ok(())
            })
        })];

        let mut ex = exchange();
        assert!(run_chain(&stages, &mut ex, None).await.is_none());
        assert_eq!(ex.request.extensions.get::<u32>(), Some(&7));
    }

    #[test]
    fn kind_is_fixed_at_registration() {
        let regular = Middleware::from_fn(Scope::After, |_| Ok(()));
        let error = Middleware::error_fn(Scope::Before, |e, _| Err(e)).named("Forward");
        assert_eq!(regular.kind(), MiddlewareKind::Regular);
        assert_eq!(regular.scope(), Scope::After);
        assert_eq!(error.kind(), MiddlewareKind::ErrorStage);
        assert_eq!(error.name(), Some("Forward"));
    }
}
