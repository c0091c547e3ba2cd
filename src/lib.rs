//! # tsu-apm
//!
//! A minimal Koa-style HTTP framework whose middleware pipeline can be
//! instrumented for application performance monitoring.
//!
//! ## What it does
//!
//! - **Transaction naming**: after a request's chain has finished, the
//!   APM transaction is named after the route that matched
//!   (`Koajs/users/:id#GET`), or, for unrouted static files, after the file
//!   extension (`Koajs/*.js#GET`).
//! - **Middleware tracing**: every middleware and controller registered
//!   after the instrumentation is built runs inside its own span. Handing
//!   over to `next` pauses the span; it resumes when `next` returns. Render
//!   calls get a `Render <view>` span of their own.
//!
//! tsu-apm does not ship an APM agent. Implement [`ApmClient`] for yours, or
//! use [`TracingClient`] to see spans and names as `tracing` events.
//!
//! ## How registration is intercepted
//!
//! [`App`] and [`Router`] never store middleware themselves: each
//! registration goes through an extension point in [`Hooks`]. Tracing
//! patches those points, so instrument first, then build the app.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tsu_apm::{App, Context, Error, Options, Router, Server, TracingClient, endpoint, instrument};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let apm = instrument(
//!         Arc::new(TracingClient),
//!         Options::default().middleware_trace(true).group_static_resources(true),
//!     )?;
//!
//!     let router = Router::new().get("/users/:id", endpoint(get_user));
//!     let app = App::new()
//!         .middleware(apm)
//!         .shared(router.routes());
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//!
//! async fn get_user(ctx: Context) -> Result<(), Error> {
//!     let id = ctx.param("id").unwrap_or_default();
//!     ctx.json(format!(r#"{{"id":"{id}"}}"#).into_bytes());
//!     Ok(())
//! }
//! ```

mod app;
mod context;
mod error;
mod router;
mod server;

pub mod apm;
pub mod hooks;
pub mod instrument;
pub mod middleware;

pub use apm::{ApmClient, Span, TracingClient};
pub use app::App;
pub use context::{Context, DEFAULT_RENDER_METHOD, RenderDecorator, RenderFn, renderer};
pub use error::{BoxError, Error};
pub use hooks::Hooks;
pub use instrument::{Instrument, InstrumentBuilder, Options, instrument};
pub use middleware::{Middleware, Next, SharedMiddleware, endpoint, named};
pub use router::{CATCH_ALL_ROUTE, Registration, RouteOptions, RouteTable, Router};
pub use server::Server;
