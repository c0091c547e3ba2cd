//! Minimal tsu-apm example: traced middleware, routed JSON endpoints, a
//! rendered page and grouped static files, reported through `tracing`.
//!
//! Run with:
//!   RUST_LOG=tsu_apm=debug cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42          → transaction Koajs/users/:id#GET
//!   curl http://localhost:3000/                  → transaction Koajs/#GET, span "Render home"
//!   curl http://localhost:3000/assets/app.js     → transaction Koajs/*.js#GET
//!   curl -X DELETE http://localhost:3000/users/42

use std::sync::Arc;

use http::header::{CACHE_CONTROL, HeaderValue};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use tsu_apm::{
    App, Context, Error, Next, Options, Router, Server, TracingClient, endpoint, instrument, renderer,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Must come before any registration: it patches the registration hooks.
    let apm = instrument(
        Arc::new(TracingClient),
        Options::default()
            .middleware_trace(true)
            .group_static_resources(true),
    )?;

    let router = Router::new()
        .get("/", endpoint(home))
        .get("/users/:id", endpoint(get_user))
        .delete("/users/:id", endpoint(delete_user));

    let app = App::new()
        .middleware(apm)
        .middleware(request_log)
        .middleware(views)
        .shared(router.routes())
        .middleware(endpoint(assets));

    Server::bind("0.0.0.0:3000").serve(app).await
}

async fn request_log(ctx: Context, next: Next) -> Result<(), Error> {
    next.run().await?;
    tracing::info!(
        method = %ctx.method(),
        path = ctx.path(),
        status = ctx.status().as_u16(),
        headers = ctx.headers().len(),
        agent = ctx.header("user-agent"),
        "handled"
    );
    Ok(())
}

// A stand-in template engine, installed per request like koa-views would.
async fn views(ctx: Context, next: Next) -> Result<(), Error> {
    ctx.set_renderer("render", renderer(|view, locals| async move {
        Ok::<_, Error>(format!("<h1>{view}</h1><p>{locals}</p>"))
    }));
    next.run().await
}

// GET /
async fn home(ctx: Context) -> Result<(), Error> {
    let page = ctx.render("home", json!({ "greeting": "hello" })).await?;
    ctx.html(page);
    Ok(())
}

// GET /users/:id
async fn get_user(ctx: Context) -> Result<(), Error> {
    let id = ctx.param("id").unwrap_or_else(|| "unknown".to_owned());
    ctx.json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes());
    Ok(())
}

// DELETE /users/:id → 204 No Content
async fn delete_user(ctx: Context) -> Result<(), Error> {
    ctx.set_status(http::StatusCode::NO_CONTENT);
    Ok(())
}

// Anything unrouted under /assets answers with an empty script.
async fn assets(ctx: Context) -> Result<(), Error> {
    if ctx.path().starts_with("/assets/") {
        ctx.set_header(CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));
        ctx.set_body("application/javascript", "");
    }
    Ok(())
}
