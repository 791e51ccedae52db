use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use reqwest::Method;

use crate::{
    dispatch::{CompleteHook, DispatchEngine},
    Context, ExtOptions, ExtOverrides, PluginPipe, RequestError, RequestOptions, Response, Result,
    TaskId, TaskRegistry,
};

/// Request client: merges configuration layers into a [`Context`], runs the
/// plugin pipes and hands the context to the dispatch engine.
pub struct Client {
    defaults: ExtOptions,
    instance: RwLock<Arc<ExtOverrides>>,
    headers: BTreeMap<String, String>,
    request_plugins: PluginPipe,
    response_plugins: PluginPipe,
    on_complete: Option<CompleteHook>,
    registry: TaskRegistry,
    task_index: AtomicU64,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("defaults", &self.defaults)
            .field("instance", &self.instance_snapshot())
            .field("headers", &self.headers)
            .field("request_plugins", &self.request_plugins)
            .field("response_plugins", &self.response_plugins)
            .field("in_flight", &self.registry.len())
            .finish()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Creates a client on top of [`ExtOptions::default`].
    pub fn new() -> Self {
        Self::with_defaults(ExtOptions::default())
    }

    /// Creates a client whose lowest configuration layer is `defaults`.
    pub fn with_defaults(defaults: ExtOptions) -> Self {
        Self {
            defaults,
            instance: RwLock::new(Arc::new(ExtOverrides::default())),
            headers: BTreeMap::new(),
            request_plugins: PluginPipe::new(),
            response_plugins: PluginPipe::new(),
            on_complete: None,
            registry: TaskRegistry::new(),
            task_index: 0.into(),
        }
    }

    /// Sets the instance configuration layer.
    pub fn with_options(self, opts: ExtOverrides) -> Self {
        *self.instance.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(opts);
        self
    }

    /// Adds an instance header. Per-call headers with the same name win.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Registers an outbound plugin, run once per call before the first attempt.
    pub fn use_request<F>(&mut self, plugin: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.request_plugins.use_fn(plugin);
        self
    }

    /// Registers an inbound plugin, run on every attempt that gets a 2xx status.
    pub fn use_response<F>(&mut self, plugin: F) -> &mut Self
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.response_plugins.use_fn(plugin);
        self
    }

    /// Sets the observer called with every call's final context.
    pub fn on_complete<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&Context, Option<&RequestError>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    /// Merges `opts` into the instance layer. Calls already in flight keep
    /// the snapshot they started with.
    pub fn update_options(&self, opts: ExtOverrides) {
        let mut guard = self.instance.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = ExtOverrides::clone(&guard);
        next.merge(opts);
        *guard = Arc::new(next);
    }

    /// The configuration a call without per-call overrides would use.
    pub fn options(&self) -> ExtOptions {
        self.defaults.merged(&self.instance_snapshot())
    }

    fn instance_snapshot(&self) -> Arc<ExtOverrides> {
        Arc::clone(&self.instance.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Sends a request and resolves with the final response.
    pub async fn request(&self, opts: impl Into<RequestOptions>) -> Result<Response> {
        let task_id = TaskId(self.task_index.fetch_add(1, Ordering::Relaxed) + 1);
        let instance = self.instance_snapshot();
        let mut ctx = Context::new(&self.defaults, &instance, &self.headers, opts.into(), task_id);

        ctx.instrument();
        self.request_plugins.pipe(&mut ctx)?;

        DispatchEngine::new(&self.registry, &self.response_plugins)
            .on_complete(self.on_complete.as_ref())
            .dispatch(&mut ctx)
            .await
    }

    pub async fn method(&self, method: Method, opts: impl Into<RequestOptions>) -> Result<Response> {
        self.request(opts.into().method(method)).await
    }

    pub async fn get(&self, opts: impl Into<RequestOptions>) -> Result<Response> {
        self.method(Method::GET, opts).await
    }

    pub async fn post(&self, opts: impl Into<RequestOptions>) -> Result<Response> {
        self.method(Method::POST, opts).await
    }

    /// Cancels every in-flight attempt. Returns how many were aborted.
    pub fn abort(&self) -> usize {
        let aborted = self.registry.abort_all();

        #[cfg(feature = "tracing")]
        tracing::debug!(aborted, "aborted in-flight requests");

        aborted
    }

    /// Number of attempts currently registered.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }
}
