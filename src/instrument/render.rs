//! Render spans.

use std::sync::Arc;

use crate::apm::{ApmClient, Span};
use crate::context::{RenderDecorator, RenderFn};
use crate::error::Error;
use crate::middleware::BoxFuture;

/// Brackets every render call with a `"Render <view>"` span.
pub(crate) struct RenderTrace {
    client: Arc<dyn ApmClient>,
}

impl RenderTrace {
    pub(crate) fn new(client: Arc<dyn ApmClient>) -> Self {
        Self { client }
    }
}

impl RenderDecorator for RenderTrace {
    fn decorate(&self, render: RenderFn) -> RenderFn {
        let client = Arc::clone(&self.client);
        Arc::new(move |view: String, locals: serde_json::Value| -> BoxFuture<Result<String, Error>> {
            let span = Span::open(client.as_ref(), &format!("Render {view}"));
            let rendering = render(view, locals);
            Box::pin(async move {
                let output = rendering.await;
                span.close();
                output
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apm::EndSpan;
    use crate::context::{Context, renderer};
    use http::Method;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl ApmClient for Log {
        fn create_tracer(&self, label: &str) -> EndSpan {
            self.0.lock().push(format!("open {label}"));
            let log = Arc::clone(&self.0);
            let label = label.to_owned();
            Box::new(move || log.lock().push(format!("close {label}")))
        }

        fn set_transaction_name(&self, _name: &str) {}
    }

    #[tokio::test]
    async fn render_keeps_output_and_errors() {
        let log = Arc::new(Log::default());
        let ctx = Context::new(Method::GET, "/");
        ctx.decorate_render("render", Arc::new(RenderTrace::new(log.clone())));

        ctx.set_renderer("render", renderer(|view, locals| async move {
            Ok::<_, Error>(format!("{view}:{}", locals["n"]))
        }));
        assert_eq!(ctx.render("home", json!({ "n": 1 })).await.unwrap(), "home:1");

        ctx.set_renderer("render", renderer(|_, _| async {
            Err::<String, _>(Error::status(http::StatusCode::BAD_GATEWAY, "engine"))
        }));
        let err = ctx.render("broken", json!(null)).await.unwrap_err();
        assert_eq!(err.status_code(), http::StatusCode::BAD_GATEWAY);

        assert_eq!(
            *log.0.lock(),
            ["open Render home", "close Render home", "open Render broken", "close Render broken"]
        );
    }
}
