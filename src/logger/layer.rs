//! Bridge from `tracing` events into the log pipeline.
//!
//! Installing a [`Logger`] as a `tracing_subscriber` layer sends every
//! event (from this crate's binary or from dependencies) through the same
//! ordered queue as direct logger calls, tagged with the event's own source
//! location.

use crate::logger::level::Level;
use crate::logger::pipeline::{Caller, Logger};
use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

impl<S> Layer<S> for Logger
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let caller = metadata
            .file()
            .zip(metadata.line())
            .map(|(file, line)| Caller::new(file, line));

        self.output(Level::from(*metadata.level()), caller, visitor.finish());
    }
}

/// Collects the `message` field plus any other fields as `key=value`.
#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: String,
}

impl EventVisitor {
    fn finish(mut self) -> String {
        if self.message.is_empty() {
            return self.fields.trim_start().to_string();
        }
        self.message.push_str(&self.fields);
        self.message
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
