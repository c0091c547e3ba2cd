//! The application: an ordered stack of global middleware.

use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;
use crate::hooks::Hooks;
use crate::middleware::{Middleware, Next, SharedMiddleware};

/// The application middleware stack.
///
/// Middleware runs in registration order, each deciding whether and when to
/// hand over to the rest of the chain. Every registration goes through the
/// application extension point of the app's [`Hooks`].
///
/// ```rust,no_run
/// use tsu_apm::{App, Context, Error, Next, Router, endpoint};
///
/// async fn timing(ctx: Context, next: Next) -> Result<(), Error> {
///     let started = std::time::Instant::now();
///     next.run().await?;
///     tracing::info!(path = ctx.path(), elapsed = ?started.elapsed(), "served");
///     Ok(())
/// }
///
/// async fn hello(ctx: Context) -> Result<(), Error> {
///     ctx.text("hello");
///     Ok(())
/// }
///
/// let app = App::new()
///     .middleware(timing)
///     .shared(Router::new().get("/", endpoint(hello)).routes());
/// ```
pub struct App {
    stack: Vec<SharedMiddleware>,
    hooks: Arc<Hooks>,
}

impl App {
    /// An app registering through [`Hooks::global`].
    pub fn new() -> Self {
        Self::with_hooks(Hooks::global())
    }

    pub fn with_hooks(hooks: Arc<Hooks>) -> Self {
        Self { stack: Vec::new(), hooks }
    }

    /// Appends a middleware to the stack.
    pub fn middleware(self, middleware: impl Middleware) -> Self {
        self.shared(Arc::new(middleware))
    }

    /// Appends an already-shared middleware, keeping its identity.
    pub fn shared(mut self, middleware: SharedMiddleware) -> Self {
        self.hooks.register_middleware(&mut self.stack, middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Freezes the stack for serving.
    pub(crate) fn into_chain(self) -> Arc<[SharedMiddleware]> {
        Arc::from(self.stack)
    }

    /// Runs one request through the whole stack in-process.
    ///
    /// The response is left on `ctx`; an error is whatever escaped the chain.
    pub async fn dispatch(&self, ctx: Context) -> Result<(), Error> {
        run_chain(Arc::from(self.stack.as_slice()), ctx).await
    }
}

impl Default for App {
    fn default() -> Self { Self::new() }
}

pub(crate) async fn run_chain(chain: Arc<[SharedMiddleware]>, ctx: Context) -> Result<(), Error> {
    Next::chain(ctx, chain, None).run().await
}
