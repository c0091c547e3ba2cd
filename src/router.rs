//! Radix-tree request router.
//!
//! One tree per HTTP method plus one for method-less mounts. O(path-length)
//! lookup via [`matchit`]. Every registration goes through the router
//! extension point of the router's [`Hooks`], so instrumentation sees each
//! middleware stack before it lands in a tree.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::context::Context;
use crate::error::Error;
use crate::hooks::Hooks;
use crate::middleware::{BoxFuture, Middleware, Next, SharedMiddleware};

/// The matched-route value of a request that only reached path-less router
/// middleware ([`Router::middleware`]).
pub const CATCH_ALL_ROUTE: &str = "(.*)";

/// Per-registration options.
#[derive(Clone, Debug, Default)]
pub struct RouteOptions {
    /// A name for the route, for logs.
    pub name: Option<String>,
}

/// One call into the router extension point.
///
/// `stack` runs in order for requests matching `path` with one of `methods`
/// (any method when empty). A patched extension point may substitute the
/// middleware in `stack`; everything else should be handed on untouched.
pub struct Registration {
    pub path: String,
    pub methods: Vec<Method>,
    pub stack: Vec<SharedMiddleware>,
    pub options: RouteOptions,
}

// ── RouteTable ────────────────────────────────────────────────────────────────

struct Route {
    pattern: String,
    name: Option<String>,
    stack: Arc<[SharedMiddleware]>,
}

/// The routes a [`Router`] has accumulated.
#[derive(Default)]
pub struct RouteTable {
    by_method: HashMap<Method, MatchitRouter<Arc<Route>>>,
    any_method: MatchitRouter<Arc<Route>>,
    catch_all: Vec<SharedMiddleware>,
}

impl RouteTable {
    /// Stores a registration as-is.
    ///
    /// # Panics
    ///
    /// Panics if the path is not a valid pattern or conflicts with a route
    /// already registered for the same method.
    pub fn insert(&mut self, registration: Registration) {
        let Registration { path, methods, stack, options } = registration;
        if path == CATCH_ALL_ROUTE {
            self.catch_all.extend(stack);
            return;
        }

        let tree_path = to_matchit(&path);
        let route = Arc::new(Route { pattern: path, name: options.name, stack: Arc::from(stack) });
        if methods.is_empty() {
            insert_route(&mut self.any_method, &tree_path, &route);
        }
        for method in methods {
            insert_route(self.by_method.entry(method).or_default(), &tree_path, &route);
        }
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(Arc<Route>, HashMap<String, String>)> {
        let matched = self.by_method.get(method)
            .and_then(|tree| tree.at(path).ok())
            .or_else(|| self.any_method.at(path).ok())?;
        let route = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((route, params))
    }
}

fn insert_route(tree: &mut MatchitRouter<Arc<Route>>, tree_path: &str, route: &Arc<Route>) {
    tree.insert(tree_path, Arc::clone(route))
        .unwrap_or_else(|e| panic!("invalid route `{}`: {e}", route.pattern));
}

/// Koa-style `:name` segments become matchit `{name}` parameters.
fn to_matchit(pattern: &str) -> String {
    pattern.split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => format!("{{{name}}}"),
            None => segment.to_owned(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The application router.
///
/// Build it at startup, then mount it with
/// `app.shared(router.routes())`. Each registration returns `self` so calls
/// chain naturally.
pub struct Router {
    table: RouteTable,
    hooks: Arc<Hooks>,
}

impl Router {
    /// A router registering through [`Hooks::global`].
    pub fn new() -> Self {
        Self::with_hooks(Hooks::global())
    }

    pub fn with_hooks(hooks: Arc<Hooks>) -> Self {
        Self { table: RouteTable::default(), hooks }
    }

    /// Registers a controller for a method + path pair.
    ///
    /// Path parameters use `:name` (or matchit's `{name}`) syntax:
    ///
    /// ```rust,no_run
    /// # use tsu_apm::{Context, Error, Next, Router};
    /// # use http::Method;
    /// # async fn get_user(_: Context, _: Next) -> Result<(), Error> { Ok(()) }
    /// # async fn delete_user(_: Context, _: Next) -> Result<(), Error> { Ok(()) }
    /// Router::new()
    ///     .on(Method::GET,    "/users/:id", get_user)
    ///     .on(Method::DELETE, "/users/:id", delete_user);
    /// ```
    pub fn on(self, method: Method, path: &str, handler: impl Middleware) -> Self {
        self.register(path, vec![method], vec![Arc::new(handler)], RouteOptions::default())
    }

    pub fn get(self, path: &str, handler: impl Middleware) -> Self { self.on(Method::GET, path, handler) }
    pub fn post(self, path: &str, handler: impl Middleware) -> Self { self.on(Method::POST, path, handler) }
    pub fn put(self, path: &str, handler: impl Middleware) -> Self { self.on(Method::PUT, path, handler) }
    pub fn patch(self, path: &str, handler: impl Middleware) -> Self { self.on(Method::PATCH, path, handler) }
    pub fn delete(self, path: &str, handler: impl Middleware) -> Self { self.on(Method::DELETE, path, handler) }

    /// Registers middleware for `path` under every method.
    pub fn mount(self, path: &str, middleware: impl Middleware) -> Self {
        self.register(path, Vec::new(), vec![Arc::new(middleware)], RouteOptions::default())
    }

    /// Registers path-less middleware, run before the stack of whichever route
    /// matched. When no route matches it still runs, and the request's matched
    /// route is [`CATCH_ALL_ROUTE`].
    pub fn middleware(self, middleware: impl Middleware) -> Self {
        self.register(CATCH_ALL_ROUTE, Vec::new(), vec![Arc::new(middleware)], RouteOptions::default())
    }

    /// Registers a whole stack in one call, through the router extension point.
    pub fn register(
        mut self,
        path: &str,
        methods: Vec<Method>,
        stack: Vec<SharedMiddleware>,
        options: RouteOptions,
    ) -> Self {
        let registration = Registration { path: path.to_owned(), methods, stack, options };
        self.hooks.register_route(&mut self.table, registration);
        self
    }

    /// The dispatching middleware for everything registered so far.
    pub fn routes(mut self) -> SharedMiddleware {
        let catch_all = Arc::from(std::mem::take(&mut self.table.catch_all));
        Arc::new(Dispatch { table: self.table, catch_all })
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

/// Looks the request up and runs the matched stack, then the outer chain.
struct Dispatch {
    table: RouteTable,
    catch_all: Arc<[SharedMiddleware]>,
}

impl Middleware for Dispatch {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<Result<(), Error>> {
        let catch_all = Arc::clone(&self.catch_all);
        match self.table.lookup(ctx.method(), ctx.path()) {
            Some((route, params)) => {
                tracing::trace!(route = %route.pattern, name = route.name.as_deref(), "route matched");
                ctx.set_route(&route.pattern, params);
                let stack = Next::chain(ctx.clone(), Arc::clone(&route.stack), Some(next));
                Next::chain(ctx, catch_all, Some(stack)).run()
            }
            None if !catch_all.is_empty() => {
                ctx.set_route(CATCH_ALL_ROUTE, HashMap::new());
                Next::chain(ctx, catch_all, Some(next)).run()
            }
            None => next.run(),
        }
    }

    fn name(&self) -> Option<&str> {
        Some("dispatch")
    }
}
