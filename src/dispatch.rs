use std::{sync::Arc, time::Duration};

use crate::{
    adapter::TaskFuture,
    classify::{check_business, normalize_retcode},
    Context, PluginPipe, RequestError, Response, Result, TaskId, TaskRegistry, TransportError,
};

/// Observer invoked once per call with the final context, and the error when
/// the call failed.
pub type CompleteHook = Arc<dyn Fn(&Context, Option<&RequestError>) + Send + Sync>;

/// Message of the logic error raised when a response plugin drops `ctx.res`.
pub const MISSING_RESPONSE_MESSAGE: &str = "Missing Response";

fn missing_response() -> RequestError {
    RequestError::logic(None, MISSING_RESPONSE_MESSAGE)
}

/// Owns the registry entry of one attempt. Dropping it removes the entry;
/// an attempt dropped before it settled is aborted as well.
struct AttemptGuard<'a> {
    registry: &'a TaskRegistry,
    task_id: TaskId,
    settled: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.registry.remove(self.task_id) {
            if !self.settled {
                handle.abort();
            }
        }
    }
}

enum State {
    Attempting,
    RetryWait(RequestError),
    Done(Result<()>),
}

/// Drives the adapter for one context: timeout, retry, response plugins and
/// the business check.
pub struct DispatchEngine<'a> {
    registry: &'a TaskRegistry,
    response_plugins: &'a PluginPipe,
    on_complete: Option<&'a CompleteHook>,
}

impl<'a> DispatchEngine<'a> {
    pub fn new(registry: &'a TaskRegistry, response_plugins: &'a PluginPipe) -> Self {
        Self {
            registry,
            response_plugins,
            on_complete: None,
        }
    }

    pub fn on_complete(mut self, hook: Option<&'a CompleteHook>) -> Self {
        self.on_complete = hook;
        self
    }

    /// Runs attempts until one succeeds, a logic error occurs, or the retry
    /// budget in `ctx.ext.options.repeat_num` is spent.
    ///
    /// Attempts are strictly sequential and share `ctx`; each one starts a
    /// fresh transport call.
    pub async fn dispatch(&self, ctx: &mut Context) -> Result<Response> {
        let mut state = State::Attempting;
        loop {
            state = match state {
                State::Attempting => match self.attempt(ctx).await {
                    Ok(()) => State::Done(Ok(())),
                    Err(err) if err.is_retryable() => State::RetryWait(err),
                    Err(err) => State::Done(Err(err)),
                },
                State::RetryWait(err) => {
                    if ctx.ext.options.repeat_num == 0 {
                        State::Done(Err(err))
                    } else {
                        ctx.ext.options.repeat_num -= 1;
                        ctx.res = None;

                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            task = %ctx.ext.task_id,
                            remaining = ctx.ext.options.repeat_num,
                            error = %err,
                            "retrying request"
                        );

                        State::Attempting
                    }
                }
                State::Done(outcome) => return self.finish(ctx, outcome),
            };
        }
    }

    async fn attempt(&self, ctx: &mut Context) -> Result<()> {
        let task_id = ctx.ext.task_id;
        let adapter = Arc::clone(&ctx.ext.options.adapter);
        ctx.ext.attempts += 1;

        let (settled, handle) = adapter.send(&ctx.req).into_parts();
        self.registry.insert(task_id, handle);
        let mut guard = AttemptGuard {
            registry: self.registry,
            task_id,
            settled: false,
        };
        let outcome = self.settle(settled, task_id, ctx.ext.options.timeout_ms).await;

        guard.settled = true;
        drop(guard);
        ctx.ext.record_cost();

        let mut response = outcome?;
        if !response.is_success() {
            return Err(RequestError::server(response.status_code));
        }

        normalize_retcode(&mut response.data, &ctx.ext.options);
        ctx.res = Some(response);
        self.response_plugins.pipe(ctx)?;

        match &ctx.res {
            Some(res) => check_business(&res.data, &ctx.ext.options),
            None => Err(missing_response()),
        }
    }

    /// Waits for the attempt to settle. When `timeout_ms > 0` and the timer
    /// fires first, the registered task is aborted and the wait continues:
    /// the abort surfaces through the adapter's own failure.
    async fn settle(
        &self,
        mut settled: TaskFuture,
        task_id: TaskId,
        timeout_ms: u64,
    ) -> std::result::Result<Response, TransportError> {
        if timeout_ms == 0 {
            return settled.await;
        }

        let timer = tokio::time::sleep(Duration::from_millis(timeout_ms));
        tokio::pin!(timer);
        let mut armed = true;

        loop {
            tokio::select! {
                outcome = &mut settled => return outcome,
                () = &mut timer, if armed => {
                    armed = false;

                    #[cfg(feature = "tracing")]
                    tracing::debug!(task = %task_id, timeout_ms, "request timed out, aborting task");

                    if let Some(handle) = self.registry.get(task_id) {
                        handle.abort();
                    }
                }
            }
        }
    }

    fn finish(&self, ctx: &mut Context, outcome: Result<()>) -> Result<Response> {
        match outcome.and_then(|()| ctx.res.clone().ok_or_else(missing_response)) {
            Ok(res) => {
                if let Some(hook) = self.on_complete {
                    hook(ctx, None);
                }
                Ok(res)
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    task = %ctx.ext.task_id,
                    url = %ctx.ext.url_without_query,
                    attempts = ctx.ext.attempts,
                    kind = %err.kind(),
                    error = %err,
                    "request failed"
                );

                if let Some(hook) = self.on_complete {
                    hook(ctx, Some(&err));
                }
                Err(err)
            }
        }
    }
}
