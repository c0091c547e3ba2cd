//! The per-request context shared by every middleware in a chain.
//!
//! A [`Context`] is a cheap handle: clones point at the same request. The
//! immutable request half (method, path, headers, body) is read without
//! locking; the response half, route data and render capabilities sit behind
//! one short-lived mutex that is never held across an `.await`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use http_body_util::Full;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::Error;
use crate::middleware::BoxFuture;

/// The name of the render capability templates use unless configured otherwise.
pub const DEFAULT_RENDER_METHOD: &str = "render";

/// A render capability: `(view, locals) -> rendered output`.
pub type RenderFn = Arc<dyn Fn(String, Value) -> BoxFuture<Result<String, Error>> + Send + Sync>;

/// Turns an async function into a [`RenderFn`].
pub fn renderer<F, Fut>(f: F) -> RenderFn
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, Error>> + Send + 'static,
{
    Arc::new(move |view: String, locals: Value| -> BoxFuture<Result<String, Error>> {
        Box::pin(f(view, locals))
    })
}

/// Substitutes every renderer assigned under one name.
///
/// Installed with [`Context::decorate_render`]; from then on each
/// [`Context::set_renderer`] for that name stores `decorate(f)` instead of `f`.
pub trait RenderDecorator: Send + Sync + 'static {
    fn decorate(&self, render: RenderFn) -> RenderFn;
}

// ── Context ───────────────────────────────────────────────────────────────────

/// One in-flight request and the response being built for it.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Bytes,
    state: Mutex<State>,
}

struct State {
    params: HashMap<String, String>,
    matched_route: Option<String>,
    status: StatusCode,
    response_headers: HeaderMap,
    response_body: Bytes,
    renderers: HashMap<String, RenderFn>,
    decorators: HashMap<String, Arc<dyn RenderDecorator>>,
}

impl Context {
    /// A bodiless request, as used when driving an [`App`](crate::App) in-process.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self::from_parts(method, path.into(), HeaderMap::new(), Bytes::new())
    }

    pub(crate) fn from_parts(method: Method, path: String, headers: HeaderMap, body: Bytes) -> Self {
        let state = State {
            params: HashMap::new(),
            matched_route: None,
            status: StatusCode::NOT_FOUND,
            response_headers: HeaderMap::new(),
            response_body: Bytes::new(),
            renderers: HashMap::new(),
            decorators: HashMap::new(),
        };
        Self {
            inner: Arc::new(Inner { method, path, headers, body, state: Mutex::new(state) }),
        }
    }

    pub fn method(&self) -> &Method { &self.inner.method }
    pub fn path(&self) -> &str { &self.inner.path }
    pub fn headers(&self) -> &HeaderMap { &self.inner.headers }
    pub fn body(&self) -> &Bytes { &self.inner.body }

    /// Header lookup; names are case-insensitive, non-UTF-8 values are skipped.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// A named path parameter of the matched route.
    ///
    /// For a route `/users/:id`, `ctx.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<String> {
        self.inner.state.lock().params.get(key).cloned()
    }

    /// The route pattern the router resolved this request to.
    ///
    /// `None` until a router has dispatched the request, or when nothing
    /// matched. [`CATCH_ALL_ROUTE`](crate::router::CATCH_ALL_ROUTE) means only
    /// path-less router middleware ran.
    pub fn matched_route(&self) -> Option<String> {
        self.inner.state.lock().matched_route.clone()
    }

    pub(crate) fn set_route(&self, pattern: &str, params: HashMap<String, String>) {
        let mut state = self.inner.state.lock();
        state.matched_route = Some(pattern.to_owned());
        state.params = params;
    }

    // ── Response ──────────────────────────────────────────────────────────────

    /// Response status; `404` until a body or status is set.
    pub fn status(&self) -> StatusCode {
        self.inner.state.lock().status
    }

    pub fn set_status(&self, status: StatusCode) {
        self.inner.state.lock().status = status;
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.state.lock().response_headers.insert(name, value);
    }

    /// Sets the response body. A still-default `404` becomes `200`.
    pub fn set_body(&self, content_type: &'static str, body: impl Into<Bytes>) {
        let mut state = self.inner.state.lock();
        if state.status == StatusCode::NOT_FOUND {
            state.status = StatusCode::OK;
        }
        state.response_headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        state.response_body = body.into();
    }

    pub fn text(&self, body: impl Into<String>) {
        self.set_body("text/plain; charset=utf-8", body.into());
    }

    /// Pass bytes straight from your serialiser, e.g. `serde_json::to_vec(&user)?`.
    pub fn json(&self, body: Vec<u8>) {
        self.set_body("application/json", body);
    }

    pub fn html(&self, body: impl Into<String>) {
        self.set_body("text/html; charset=utf-8", body.into());
    }

    pub fn response_body(&self) -> Bytes {
        self.inner.state.lock().response_body.clone()
    }

    pub(crate) fn to_response(&self) -> http::Response<Full<Bytes>> {
        let state = self.inner.state.lock();
        let mut response = http::Response::new(Full::new(state.response_body.clone()));
        *response.status_mut() = state.status;
        *response.headers_mut() = state.response_headers.clone();
        response
    }

    // ── Render capability ─────────────────────────────────────────────────────

    /// Assigns the render capability `name`, passing it through the decorator
    /// installed for that name, if any.
    pub fn set_renderer(&self, name: &str, render: RenderFn) {
        let mut state = self.inner.state.lock();
        let render = match state.decorators.get(name) {
            Some(decorator) => decorator.decorate(render),
            None => render,
        };
        state.renderers.insert(name.to_owned(), render);
    }

    /// Installs `decorator` for the render capability `name`, replacing any
    /// earlier decorator. A renderer already assigned is decorated right away.
    pub fn decorate_render(&self, name: &str, decorator: Arc<dyn RenderDecorator>) {
        let mut state = self.inner.state.lock();
        if let Some(current) = state.renderers.remove(name) {
            let decorated = decorator.decorate(current);
            state.renderers.insert(name.to_owned(), decorated);
        }
        state.decorators.insert(name.to_owned(), decorator);
    }

    /// Renders `view` with the default `"render"` capability.
    pub async fn render(&self, view: impl Into<String>, locals: Value) -> Result<String, Error> {
        self.render_with(DEFAULT_RENDER_METHOD, view, locals).await
    }

    /// Renders `view` with the capability assigned under `name`.
    ///
    /// The output is returned as-is; setting it as the body is up to the caller.
    pub async fn render_with(
        &self,
        name: &str,
        view: impl Into<String>,
        locals: Value,
    ) -> Result<String, Error> {
        let render = self.inner.state.lock().renderers.get(name).cloned();
        let render = render.ok_or_else(|| Error::RenderUnavailable(name.to_owned()))?;
        render(view.into(), locals).await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.inner.method)
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Shout;

    impl RenderDecorator for Shout {
        fn decorate(&self, render: RenderFn) -> RenderFn {
            Arc::new(move |view: String, locals: Value| -> BoxFuture<Result<String, Error>> {
                let render = Arc::clone(&render);
                Box::pin(async move { render(view, locals).await.map(|s| s.to_uppercase()) })
            })
        }
    }

    fn echo() -> RenderFn {
        renderer(|view, _locals| async move { Ok::<_, Error>(format!("view:{view}")) })
    }

    #[test]
    fn body_promotes_default_status() {
        let ctx = Context::new(Method::GET, "/");
        assert_eq!(ctx.status(), StatusCode::NOT_FOUND);
        ctx.text("hi");
        assert_eq!(ctx.status(), StatusCode::OK);
        ctx.set_status(StatusCode::CREATED);
        ctx.json(b"{}".to_vec());
        assert_eq!(ctx.status(), StatusCode::CREATED);
        assert_eq!(ctx.to_response().headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn request_headers_and_body_are_readable() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        headers.insert("x-raw", HeaderValue::from_bytes(b"\xff").unwrap());
        let ctx = Context::from_parts(Method::POST, "/echo".to_owned(), headers, Bytes::from_static(b"{}"));

        assert_eq!(ctx.header("X-Request-Id"), Some("abc"));
        assert_eq!(ctx.header("x-raw"), None);
        assert_eq!(ctx.headers().len(), 2);
        assert_eq!(ctx.body().as_ref(), b"{}");

        ctx.set_header(HeaderName::from_static("x-request-id"), HeaderValue::from_static("abc"));
        assert_eq!(ctx.to_response().headers()["x-request-id"], "abc");
    }

    #[tokio::test]
    async fn render_without_capability_fails() {
        let ctx = Context::new(Method::GET, "/");
        let err = ctx.render("index", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::RenderUnavailable(name) if name == "render"));
    }

    #[tokio::test]
    async fn decorator_applies_to_every_later_assignment() {
        let ctx = Context::new(Method::GET, "/");
        ctx.decorate_render("render", Arc::new(Shout));
        ctx.set_renderer("render", echo());
        assert_eq!(ctx.render("a", json!({})).await.unwrap(), "VIEW:A");

        ctx.set_renderer("render", renderer(|_, _| async { Ok::<_, Error>("second".to_owned()) }));
        assert_eq!(ctx.render("a", json!({})).await.unwrap(), "SECOND");
    }

    #[tokio::test]
    async fn decorator_wraps_renderer_already_present() {
        let ctx = Context::new(Method::GET, "/");
        ctx.set_renderer("view", echo());
        ctx.decorate_render("view", Arc::new(Shout));
        assert_eq!(ctx.render_with("view", "b", json!({})).await.unwrap(), "VIEW:B");
        // other capabilities are left alone
        ctx.set_renderer("render", echo());
        assert_eq!(ctx.render("b", json!({})).await.unwrap(), "view:b");
    }
}
