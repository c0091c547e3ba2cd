//! Per-middleware spans and the registration patches that install them.
//!
//! A traced middleware's own span covers only the time spent in its own
//! code. Handing over to the continuation closes the span, and it reopens
//! under the same label once the continuation returns:
//!
//! ```text
//! A ──open(A)── next ─close(A)──────────────────────────── open(A) ── close(A)
//! B                    open(B) ── next ─close(B)── open(B) ─ close(B)
//! C                                  open(C) ─ close(C)
//! ```

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::apm::{ApmClient, SpanCell};
use crate::context::Context;
use crate::error::Error;
use crate::hooks::{Hooks, RegisterFn, UseFn};
use crate::middleware::{BoxFuture, Middleware, Next, SharedMiddleware};
use crate::router::{RouteTable, Registration};

/// Wraps middleware so each invocation is bracketed by APM spans.
pub struct MiddlewareTracer {
    client: Arc<dyn ApmClient>,
    /// Anonymous middleware in first-seen order; the index is the ordinal.
    /// Weak, so tracing a middleware never keeps it alive.
    anonymous: parking_lot::Mutex<Vec<Weak<dyn Middleware>>>,
}

impl MiddlewareTracer {
    pub fn new(client: Arc<dyn ApmClient>) -> Self {
        Self { client, anonymous: parking_lot::Mutex::new(Vec::new()) }
    }

    /// A middleware with the same contract as `middleware`, traced as
    /// `"Middleware <name>"`.
    pub fn wrap(&self, middleware: SharedMiddleware) -> SharedMiddleware {
        let label: Arc<str> = Arc::from(format!("Middleware {}", self.display_name(&middleware)));
        Arc::new(Traced { inner: middleware, label, client: Arc::clone(&self.client) })
    }

    /// [`wrap`](Self::wrap), passing nothing through untouched.
    pub fn wrap_optional(&self, middleware: Option<SharedMiddleware>) -> Option<SharedMiddleware> {
        middleware.map(|m| self.wrap(m))
    }

    /// The declared name, or `anonymous<N>` with `N` stable per middleware.
    pub fn display_name(&self, middleware: &SharedMiddleware) -> String {
        if let Some(name) = middleware.name() {
            return name.to_owned();
        }
        format!("anonymous{}", self.ordinal(middleware))
    }

    fn ordinal(&self, middleware: &SharedMiddleware) -> usize {
        let mut seen = self.anonymous.lock();
        let target = Arc::as_ptr(middleware);
        // Dead entries are never pruned and lookups are linear: anonymous
        // middleware is only wrapped while the app is being assembled.
        // A dead entry's address may have been reused, so it never matches.
        let known = seen.iter().position(|entry| {
            entry.strong_count() > 0 && std::ptr::addr_eq(entry.as_ptr(), target)
        });
        known.unwrap_or_else(|| {
            seen.push(Arc::downgrade(middleware));
            seen.len() - 1
        })
    }
}

/// A middleware running inside its own span.
struct Traced {
    inner: SharedMiddleware,
    label: Arc<str>,
    client: Arc<dyn ApmClient>,
}

impl Middleware for Traced {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<Result<(), Error>> {
        let span = SpanCell::open(Arc::clone(&self.client), Arc::clone(&self.label));
        let running = self.inner.call(ctx, next.traced(span.clone()));
        Box::pin(async move {
            let result = running.await;
            span.close();
            result
        })
    }

    fn name(&self) -> Option<&str> {
        self.inner.name()
    }
}

/// Patches `hooks` so every later registration is traced through `tracer`.
///
/// Earlier patches are reversed first, so applying any number of times
/// leaves exactly one patch per extension point. The application point is
/// required; a host without a router point gets application tracing only.
pub fn apply(hooks: &Hooks, tracer: Arc<MiddlewareTracer>) -> Result<(), Error> {
    hooks.reverse();

    let use_tracer = Arc::clone(&tracer);
    let patched = hooks.patch_use(move |original| -> Arc<UseFn> {
        Arc::new(move |stack: &mut Vec<SharedMiddleware>, middleware: SharedMiddleware| {
            original(stack, use_tracer.wrap(middleware))
        })
    });
    if !patched {
        return Err(Error::FrameworkUnavailable("application"));
    }

    let patched = hooks.patch_register(move |original| -> Arc<RegisterFn> {
        Arc::new(move |table: &mut RouteTable, registration: Registration| {
            let stack = registration.stack.into_iter().map(|m| tracer.wrap(m)).collect();
            original(table, Registration { stack, ..registration })
        })
    });
    if !patched {
        debug!("router extension point not available, tracing application middleware only");
    }
    Ok(())
}
