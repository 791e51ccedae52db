use std::{fmt, sync::Arc};

use crate::{Context, Result};

/// A synchronous context transform. Returning `Err` stops the pipe.
pub type PluginFn = Arc<dyn Fn(&mut Context) -> Result<()> + Send + Sync>;

/// Ordered chain of context transforms, applied in registration order.
#[derive(Clone, Default)]
pub struct PluginPipe {
    handlers: Vec<PluginFn>,
}

impl PluginPipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transform to the end of the chain.
    pub fn use_fn<F>(&mut self, plugin: F)
    where
        F: Fn(&mut Context) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(plugin));
    }

    /// Runs every transform left to right. The first error is returned
    /// unchanged and the remaining transforms are skipped.
    pub fn pipe(&self, ctx: &mut Context) -> Result<()> {
        self.handlers.iter().try_for_each(|plugin| plugin(ctx))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for PluginPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginPipe")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
