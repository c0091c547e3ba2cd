//! The APM client seam and the span adapter built on top of it.
//!
//! tsu does not talk to an APM backend itself. Anything that can open a named
//! timer and label the current transaction implements [`ApmClient`]; the
//! instrumentation only ever goes through [`Span`], which guarantees every
//! opened tracer is ended exactly once.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

/// Ends a tracer previously opened by [`ApmClient::create_tracer`].
pub type EndSpan = Box<dyn FnOnce() + Send + 'static>;

/// The two operations the instrumentation needs from an APM agent.
pub trait ApmClient: Send + Sync + 'static {
    /// Starts timing a unit of work labelled `label`. Calling the returned
    /// closure stops it.
    fn create_tracer(&self, label: &str) -> EndSpan;

    /// Names the transaction the current request is recorded under.
    fn set_transaction_name(&self, name: &str);
}

// ── Span ──────────────────────────────────────────────────────────────────────

/// An open tracer.
///
/// Closed by [`Span::close`] or, failing that, when dropped: an error, a panic
/// or a cancelled request future all end the tracer too.
#[must_use = "a span is closed as soon as it is dropped"]
pub struct Span {
    end: Option<EndSpan>,
}

impl Span {
    pub fn open(client: &dyn ApmClient, label: &str) -> Self {
        Self { end: Some(client.create_tracer(label)) }
    }

    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(end) = self.end.take() {
            end();
        }
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.finish();
    }
}

/// The span slot of one traced middleware invocation.
///
/// Shared between the wrapper and the continuation it hands to the inner
/// middleware, so either side can close the current span and the
/// continuation can open the next one under the same label.
#[derive(Clone)]
pub(crate) struct SpanCell {
    client: Arc<dyn ApmClient>,
    label: Arc<str>,
    current: Arc<parking_lot::Mutex<Option<Span>>>,
}

impl SpanCell {
    pub(crate) fn open(client: Arc<dyn ApmClient>, label: Arc<str>) -> Self {
        let span = Span::open(client.as_ref(), &label);
        Self { client, label, current: Arc::new(parking_lot::Mutex::new(Some(span))) }
    }

    /// Closes the open span, if any. The tracer is ended outside the lock.
    pub(crate) fn close(&self) {
        let span = self.current.lock().take();
        if let Some(span) = span {
            span.close();
        }
    }

    pub(crate) fn reopen(&self) {
        let span = Span::open(self.client.as_ref(), &self.label);
        let previous = self.current.lock().replace(span);
        drop(previous);
    }
}

// ── TracingClient ─────────────────────────────────────────────────────────────

/// An [`ApmClient`] that reports through `tracing`.
///
/// Span timings are emitted as `debug` events carrying the label and the
/// elapsed time, transaction names as `info` events. Useful in development
/// and as a stand-in when no agent is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingClient;

impl ApmClient for TracingClient {
    fn create_tracer(&self, label: &str) -> EndSpan {
        let label = label.to_owned();
        let started = Instant::now();
        Box::new(move || {
            debug!(target: "tsu_apm::apm", span = %label, elapsed_us = started.elapsed().as_micros() as u64, "span closed");
        })
    }

    fn set_transaction_name(&self, name: &str) {
        info!(target: "tsu_apm::apm", transaction = name, "transaction named");
    }
}
