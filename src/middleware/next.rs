//! The continuation handed to each middleware.

use std::sync::Arc;

use crate::apm::SpanCell;
use crate::context::Context;
use crate::error::Error;

use super::{BoxFuture, SharedMiddleware};

/// The rest of the chain after the current middleware.
///
/// `next.run().await` runs every downstream middleware and resolves once
/// they have all returned. `run` takes `self`, so a continuation runs at most
/// once; dropping it unrun ends the chain at the current middleware.
pub struct Next {
    ctx: Context,
    step: Step,
}

enum Step {
    /// Position `index` of `chain`; `tail` continues once `chain` is exhausted.
    Chain {
        chain: Arc<[SharedMiddleware]>,
        index: usize,
        tail: Option<Box<Next>>,
    },
    /// A traced middleware's view of its continuation: the middleware's span
    /// is closed while `inner` runs and reopened when it returns.
    Traced { span: SpanCell, inner: Box<Next> },
}

impl Next {
    pub(crate) fn chain(ctx: Context, chain: Arc<[SharedMiddleware]>, tail: Option<Next>) -> Self {
        Self { ctx, step: Step::Chain { chain, index: 0, tail: tail.map(Box::new) } }
    }

    pub(crate) fn traced(self, span: SpanCell) -> Self {
        Self { ctx: self.ctx.clone(), step: Step::Traced { span, inner: Box::new(self) } }
    }

    /// Runs the downstream chain.
    pub fn run(self) -> BoxFuture<Result<(), Error>> {
        match self.step {
            Step::Chain { chain, index, tail } => {
                let current = chain.get(index).cloned();
                match current {
                    Some(middleware) => {
                        let next = Next {
                            ctx: self.ctx.clone(),
                            step: Step::Chain { chain, index: index + 1, tail },
                        };
                        middleware.call(self.ctx, next)
                    }
                    None => match tail {
                        Some(tail) => tail.run(),
                        None => Box::pin(async { Ok(()) }),
                    },
                }
            }
            // Reopened only once the delegate has returned. A request dropped
            // mid-delegate leaves the span closed.
            Step::Traced { span, inner } => Box::pin(async move {
                span.close();
                let result = inner.run().await;
                span.reopen();
                result
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use parking_lot::Mutex;

    fn push(log: &Arc<Mutex<Vec<&'static str>>>, before: &'static str, after: &'static str) -> SharedMiddleware {
        let log = Arc::clone(log);
        Arc::new(move |_ctx: Context, next: Next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(before);
                next.run().await?;
                log.lock().push(after);
                Ok::<(), Error>(())
            }
        })
    }

    #[tokio::test]
    async fn runs_chain_then_tail_in_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ctx = Context::new(Method::GET, "/");
        let outer: Arc<[SharedMiddleware]> = Arc::from(vec![push(&log, "tail>", "<tail")]);
        let inner: Arc<[SharedMiddleware]> = Arc::from(vec![push(&log, "a>", "<a"), push(&log, "b>", "<b")]);

        let tail = Next::chain(ctx.clone(), outer, None);
        Next::chain(ctx, inner, Some(tail)).run().await.unwrap();

        assert_eq!(*log.lock(), ["a>", "b>", "tail>", "<tail", "<b", "<a"]);
    }

    #[tokio::test]
    async fn error_short_circuits_upstream_work() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: SharedMiddleware = Arc::new(|_ctx: Context, _next: Next| async {
            Err::<(), _>(Error::status(http::StatusCode::IM_A_TEAPOT, "short"))
        });
        let chain: Arc<[SharedMiddleware]> = Arc::from(vec![push(&log, "a>", "<a"), failing]);

        let err = Next::chain(Context::new(Method::GET, "/"), chain, None).run().await.unwrap_err();

        assert_eq!(err.status_code(), http::StatusCode::IM_A_TEAPOT);
        assert_eq!(*log.lock(), ["a>"]);
    }
}
