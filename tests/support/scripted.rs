//! Deterministic session: cooperative runner plus scripted transport.

use std::sync::{Arc, Mutex};

use requestor::{AsyncRunner, LocalRunner, ScriptedTransport, Session, SessionConfig};

/// A session whose requests only move when the test drives the runner.
pub struct Harness {
    pub runner: LocalRunner,
    pub transport: Arc<ScriptedTransport>,
    pub session: Session,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let runner = LocalRunner::new();
        let shared: Arc<dyn AsyncRunner> = Arc::new(runner.clone());
        let transport = Arc::new(ScriptedTransport::new(Arc::clone(&shared)));
        let session = Session::new(config, shared, transport.clone());
        Self {
            runner,
            transport,
            session,
        }
    }
}

/// Ordered log of callback names, shareable with callbacks.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    /// Returns a callback that records `event` whatever its argument.
    pub fn recorder<A: ?Sized>(&self, event: &str) -> Box<dyn Fn(&A) + Send + Sync> {
        let log = self.clone();
        let event = event.to_string();
        Box::new(move |_: &A| log.push(event.clone()))
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}
