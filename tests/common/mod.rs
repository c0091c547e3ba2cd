//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tsu_apm::apm::EndSpan;
use tsu_apm::{ApmClient, Hooks, Instrument, Options};

/// An [`ApmClient`] that remembers everything it was asked to do.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
    names: Mutex<Vec<String>>,
}

impl Recorder {
    /// Span events in order, as `"open <label>"` / `"close <label>"`.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Transaction names in the order they were set.
    pub fn names(&self) -> Vec<String> {
        self.names.lock().clone()
    }
}

pub struct RecordingClient(pub Arc<Recorder>);

impl ApmClient for RecordingClient {
    fn create_tracer(&self, label: &str) -> EndSpan {
        self.0.events.lock().push(format!("open {label}"));
        let recorder = Arc::clone(&self.0);
        let label = label.to_owned();
        Box::new(move || recorder.events.lock().push(format!("close {label}")))
    }

    fn set_transaction_name(&self, name: &str) {
        self.0.names.lock().push(name.to_owned());
    }
}

/// Fresh hooks, a recorder and an instrumentation built on both.
pub fn instrumented(options: Options) -> (Arc<Hooks>, Arc<Recorder>, Instrument) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let hooks = Arc::new(Hooks::new());
    let recorder = Arc::new(Recorder::default());
    let apm = Instrument::builder()
        .client(Arc::new(RecordingClient(Arc::clone(&recorder))))
        .hooks(Arc::clone(&hooks))
        .options(options)
        .build()
        .expect("instrumentation builds");
    (hooks, recorder, apm)
}
