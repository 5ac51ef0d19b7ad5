//! Progress and log sink capability.
//!
//! Every stage reports through this two-method interface; the pipeline
//! never blocks on, or reacts to, what the sink does with the calls.

use std::sync::Mutex;

use tracing::info;

pub trait EventSink: Send + Sync {
    fn log(&self, message: &str);
    fn progress(&self, current: usize, total: usize);
}

/// Default sink: forwards everything to tracing (console + run log file).
pub struct TracingSink;

impl EventSink for TracingSink {
    fn log(&self, message: &str) {
        info!("{message}");
    }

    fn progress(&self, current: usize, total: usize) {
        let percentage = if total == 0 {
            100.0
        } else {
            current as f64 / total as f64 * 100.0
        };
        info!("progress: {current}/{total} ({percentage:.1}%)");
    }
}

/// Captures everything for assertions in tests.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
    ticks: Mutex<Vec<(usize, usize)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("sink mutex poisoned").clone()
    }

    pub fn ticks(&self) -> Vec<(usize, usize)> {
        self.ticks.lock().expect("sink mutex poisoned").clone()
    }
}

impl EventSink for RecordingSink {
    fn log(&self, message: &str) {
        self.messages
            .lock()
            .expect("sink mutex poisoned")
            .push(message.to_string());
    }

    fn progress(&self, current: usize, total: usize) {
        self.ticks
            .lock()
            .expect("sink mutex poisoned")
            .push((current, total));
    }
}
