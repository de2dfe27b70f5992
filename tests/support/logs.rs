//! Captures tracing events emitted while a closure runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    pub fn message(&self) -> &str {
        self.fields.get("message").map_or("", String::as_str)
    }
}

#[derive(Default)]
struct EventFieldVisitor {
    fields: HashMap<String, String>,
}

impl Visit for EventFieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), format!("{value:?}"));
    }
}

#[derive(Clone)]
struct EventCaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl<S> Layer<S> for EventCaptureLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EventFieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields: visitor.fields,
        });
    }
}

/// Runs `action` under a capturing subscriber and returns what it logged.
pub fn capture<R>(action: impl FnOnce() -> R) -> (R, Vec<CapturedEvent>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with(EventCaptureLayer {
            events: Arc::clone(&events),
        });

    let result = tracing::subscriber::with_default(subscriber, || {
        // Callsites first hit by parallel tests under the no-op dispatcher
        // cache `Interest::never`; refresh them for this subscriber.
        tracing::callsite::rebuild_interest_cache();
        action()
    });
    let events = events.lock().unwrap().clone();
    (result, events)
}

/// Warnings in `events` whose message contains `needle`.
pub fn warnings<'a>(events: &'a [CapturedEvent], needle: &str) -> Vec<&'a CapturedEvent> {
    events
        .iter()
        .filter(|event| event.level == Level::WARN && event.message().contains(needle))
        .collect()
}
