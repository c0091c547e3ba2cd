//! APM instrumentation: transaction naming and middleware tracing.
//!
//! [`instrument`] returns a middleware that, once the rest of the chain has
//! finished, names the request's APM transaction after the matched route
//! (or, optionally, after the static-file extension). With
//! [`Options::middleware_trace`] it also patches the registration hooks so
//! every middleware registered *afterwards* is timed individually.
//!
//! Register the returned middleware first, before any other middleware or
//! router, so it sees the whole chain:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tsu_apm::{App, Options, Router, TracingClient, instrument};
//!
//! # fn main() -> Result<(), tsu_apm::Error> {
//! let apm = instrument(Arc::new(TracingClient), Options::default().middleware_trace(true))?;
//! let app = App::new()
//!     .middleware(apm)
//!     .shared(Router::new().routes());
//! # Ok(())
//! # }
//! ```

mod naming;
mod render;
mod trace;

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::apm::ApmClient;
use crate::context::{Context, DEFAULT_RENDER_METHOD};
use crate::error::Error;
use crate::hooks::Hooks;
use crate::middleware::{BoxFuture, Middleware, Next};

pub use naming::{
    DEFAULT_STATIC_EXTENSIONS, NameFn, TransactionNamer, default_transaction_name, static_extension,
};
pub use trace::{MiddlewareTracer, apply};

use render::RenderTrace;

// ── Options ───────────────────────────────────────────────────────────────────

/// Instrumentation settings. Every field is optional.
///
/// Deserializable so hosts can keep it in their own config file:
///
/// ```toml
/// [apm]
/// group_static_resources = true
/// middleware_trace = true
/// static_extensions = ["js", "css"]
/// ```
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    group_static_resources: bool,
    middleware_trace: bool,
    render_method_name: String,
    static_extensions: Vec<String>,
    #[serde(skip)]
    transaction_name: Option<NameFn>,
}

impl Options {
    /// Name `GET` requests for static files after their extension when no
    /// route matched. Off by default.
    pub fn group_static_resources(mut self, enabled: bool) -> Self {
        self.group_static_resources = enabled;
        self
    }

    /// Trace every middleware registered after construction. Off by default.
    pub fn middleware_trace(mut self, enabled: bool) -> Self {
        self.middleware_trace = enabled;
        self
    }

    /// Replaces [`default_transaction_name`].
    pub fn transaction_name<F>(mut self, name: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.transaction_name = Some(Arc::new(name));
        self
    }

    /// The render capability to trace. Defaults to `"render"`.
    pub fn render_method_name(mut self, name: impl Into<String>) -> Self {
        self.render_method_name = name.into();
        self
    }

    /// Extensions grouped by [`group_static_resources`](Self::group_static_resources).
    pub fn static_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    fn render_method(&self) -> &str {
        if self.render_method_name.is_empty() {
            DEFAULT_RENDER_METHOD
        } else {
            &self.render_method_name
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            group_static_resources: false,
            middleware_trace: false,
            render_method_name: DEFAULT_RENDER_METHOD.to_owned(),
            static_extensions: DEFAULT_STATIC_EXTENSIONS.map(String::from).to_vec(),
            transaction_name: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("group_static_resources", &self.group_static_resources)
            .field("middleware_trace", &self.middleware_trace)
            .field("render_method_name", &self.render_method_name)
            .field("static_extensions", &self.static_extensions)
            .field("transaction_name", &self.transaction_name.as_ref().map(|_| "custom"))
            .finish()
    }
}

// ── Instrument ────────────────────────────────────────────────────────────────

/// Builds an [`Instrument`] on [`Hooks::global`] with `client` and `options`.
pub fn instrument(client: Arc<dyn ApmClient>, options: Options) -> Result<Instrument, Error> {
    Instrument::builder().client(client).options(options).build()
}

/// The instrumentation middleware.
pub struct Instrument {
    client: Arc<dyn ApmClient>,
    namer: Arc<TransactionNamer>,
    render_method: Arc<str>,
}

impl Instrument {
    pub fn builder() -> InstrumentBuilder {
        InstrumentBuilder::default()
    }
}

impl Middleware for Instrument {
    fn call(&self, ctx: Context, next: Next) -> BoxFuture<Result<(), Error>> {
        ctx.decorate_render(&self.render_method, Arc::new(RenderTrace::new(Arc::clone(&self.client))));
        let client = Arc::clone(&self.client);
        let namer = Arc::clone(&self.namer);
        Box::pin(async move {
            next.run().await?;
            let route = ctx.matched_route();
            if let Some(name) = namer.resolve(ctx.method(), ctx.path(), route.as_deref()) {
                client.set_transaction_name(&name);
            }
            Ok(())
        })
    }

    fn name(&self) -> Option<&str> {
        Some("instrument")
    }
}

/// Configures an [`Instrument`].
#[derive(Default)]
pub struct InstrumentBuilder {
    client: Option<Arc<dyn ApmClient>>,
    options: Options,
    hooks: Option<Arc<Hooks>>,
}

impl InstrumentBuilder {
    pub fn client(mut self, client: Arc<dyn ApmClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// The hooks to patch. Defaults to [`Hooks::global`].
    pub fn hooks(mut self, hooks: Arc<Hooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Reverses any earlier instrumentation of the hooks, then installs this one.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidClient`] without a client; [`Error::FrameworkUnavailable`]
    /// when middleware tracing is requested and the hooks have no application
    /// extension point.
    pub fn build(self) -> Result<Instrument, Error> {
        let hooks = self.hooks.unwrap_or_else(Hooks::global);
        hooks.reverse();

        let client = self.client.ok_or(Error::InvalidClient("no client configured"))?;
        let options = self.options;

        if options.middleware_trace {
            apply(&hooks, Arc::new(MiddlewareTracer::new(Arc::clone(&client))))?;
        }

        let name = options.transaction_name.clone()
            .unwrap_or_else(|| Arc::new(default_transaction_name));
        let namer = TransactionNamer::new(
            name,
            options.group_static_resources,
            options.static_extensions.iter().cloned(),
        );

        Ok(Instrument {
            render_method: Arc::from(options.render_method()),
            client,
            namer: Arc::new(namer),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apm::TracingClient;

    #[test]
    fn missing_client_fails_fast() {
        let err = Instrument::builder().hooks(Arc::new(Hooks::new())).build().err().unwrap();
        assert!(matches!(err, Error::InvalidClient(_)));
    }

    #[test]
    fn construction_reverses_previous_patches_even_without_tracing() {
        let hooks = Arc::new(Hooks::new());
        let traced = Options::default().middleware_trace(true);
        Instrument::builder().client(Arc::new(TracingClient)).hooks(Arc::clone(&hooks)).options(traced).build().unwrap();
        assert_eq!(hooks.active_patches(), 2);

        Instrument::builder().client(Arc::new(TracingClient)).hooks(Arc::clone(&hooks)).build().unwrap();
        assert_eq!(hooks.active_patches(), 0);
    }

    #[test]
    fn tracing_needs_application_point() {
        let err = Instrument::builder()
            .client(Arc::new(TracingClient))
            .hooks(Arc::new(Hooks::detached()))
            .options(Options::default().middleware_trace(true))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::FrameworkUnavailable(_)));
    }

    #[test]
    fn empty_render_method_falls_back_to_default() {
        assert_eq!(Options::default().render_method_name("").render_method(), "render");
        assert_eq!(Options::default().render_method_name("view").render_method(), "view");
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: Options = toml::from_str(
            r#"
            group_static_resources = true
            static_extensions = ["weird"]
            "#,
        )
        .unwrap();
        assert!(options.group_static_resources);
        assert!(!options.middleware_trace);
        assert_eq!(options.render_method(), "render");
        assert_eq!(options.static_extensions, ["weird"]);
    }
}
