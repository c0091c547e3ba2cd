//! Middleware trait and type erasure.
//!
//! Every unit of work in tsu is middleware: global application middleware,
//! router-level middleware and route controllers alike. Each receives the
//! request [`Context`] and a [`Next`] continuation, and may do work before and
//! after awaiting `next.run()`.
//!
//! # How middleware is stored
//!
//! The app and the router keep middleware of *different* types in one list,
//! so everything is erased to [`SharedMiddleware`] (`Arc<dyn Middleware>`):
//!
//! ```text
//! async fn auth(ctx: Context, next: Next) -> Result<(), Error> { … }  ← user writes this
//!        ↓ app.middleware(auth)
//! Arc::new(auth)                                  ← blanket impl below
//!        ↓ stored as SharedMiddleware
//! mw.call(ctx, next)  at request time             ← one vtable dispatch
//! ```
//!
//! The `Arc` doubles as the middleware's identity: registering the same
//! `SharedMiddleware` twice registers the *same* middleware twice.

mod next;

use std::any::type_name;
use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;

pub use next::Next;

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` let tokio move the future across worker threads.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A type-erased middleware shared by every request that runs through it.
pub type SharedMiddleware = Arc<dyn Middleware>;

/// One link of a middleware chain.
///
/// Implemented automatically for any
///
/// ```text
/// async fn name(ctx: Context, next: Next) -> Result<(), Error>
/// ```
///
/// and for closures of the same shape.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<Result<(), Error>>;

    /// The declared name, if the middleware has one. Closures are anonymous.
    fn name(&self) -> Option<&str> {
        None
    }
}

impl<F, Fut> Middleware for F
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<Result<(), Error>> {
        Box::pin(self(ctx, next))
    }

    fn name(&self) -> Option<&str> {
        fn_name::<F>()
    }
}

/// The item name of a function type, `None` for closures.
///
/// `my_app::auth::check` yields `check`, `my_app::guard<my_app::Redis>`
/// yields `guard`. Only a closure type itself is anonymous; a function
/// declared inside a closure body keeps its name.
fn fn_name<F>() -> Option<&'static str> {
    let path = strip_generics(type_name::<F>());
    let last = path.rsplit("::").next()?;
    (last != "{{closure}}").then_some(last)
}

/// Drops a trailing `<...>` argument list, nested brackets included.
fn strip_generics(path: &str) -> &str {
    if !path.ends_with('>') {
        return path;
    }
    let mut depth = 0usize;
    for (i, c) in path.char_indices().rev() {
        match c {
            '>' => depth += 1,
            '<' => {
                depth -= 1;
                if depth == 0 {
                    return &path[..i];
                }
            }
            _ => {}
        }
    }
    path
}

// ── Named ─────────────────────────────────────────────────────────────────────

/// Gives a middleware an explicit name, typically a closure.
pub fn named<M: Middleware>(name: impl Into<Cow<'static, str>>, middleware: M) -> Named<M> {
    Named { name: name.into(), inner: middleware }
}

/// See [`named`].
pub struct Named<M> {
    name: Cow<'static, str>,
    inner: M,
}

impl<M: Middleware> Middleware for Named<M> {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<Result<(), Error>> {
        self.inner.call(ctx, next)
    }

    fn name(&self) -> Option<&str> {
        Some(&*self.name)
    }
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// Adapts a controller that never delegates, `async fn(Context) -> Result<(), Error>`.
///
/// The continuation is dropped unrun, so an endpoint always ends the chain.
pub fn endpoint<F, Fut>(f: F) -> Endpoint<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Endpoint(f)
}

/// See [`endpoint`].
pub struct Endpoint<F>(F);

impl<F, Fut> Middleware for Endpoint<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn call(&self, ctx: Context, _next: Next) -> BoxFuture<Result<(), Error>> {
        Box::pin((self.0)(ctx))
    }

    fn name(&self) -> Option<&str> {
        fn_name::<F>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn request_logger(_ctx: Context, next: Next) -> Result<(), Error> {
        next.run().await
    }

    async fn show_user(_ctx: Context) -> Result<(), Error> {
        Ok(())
    }

    fn erase(m: impl Middleware) -> SharedMiddleware {
        Arc::new(m)
    }

    #[test]
    fn fn_items_keep_their_name() {
        assert_eq!(erase(request_logger).name(), Some("request_logger"));
        assert_eq!(erase(endpoint(show_user)).name(), Some("show_user"));
    }

    struct Redis;

    async fn guard<S: Send + Sync + 'static>(_ctx: Context, next: Next) -> Result<(), Error> {
        next.run().await
    }

    #[test]
    fn generic_fn_items_are_named_without_arguments() {
        assert_eq!(erase(guard::<Redis>).name(), Some("guard"));
        assert_eq!(erase(guard::<Vec<Option<Redis>>>).name(), Some("guard"));
        assert_eq!(strip_generics("a::b<c::D<E>>"), "a::b");
        assert_eq!(strip_generics("a::b"), "a::b");
    }

    #[test]
    fn fn_declared_inside_closure_keeps_its_name() {
        let build = || {
            async fn audit(_ctx: Context, next: Next) -> Result<(), Error> {
                next.run().await
            }
            erase(audit)
        };
        assert_eq!(build().name(), Some("audit"));
    }

    #[test]
    fn closures_are_anonymous_unless_named() {
        let closure = |_ctx: Context, next: Next| async move { next.run().await };
        assert_eq!(erase(closure).name(), None);
        assert_eq!(erase(named("auth", closure)).name(), Some("auth"));
    }
}
