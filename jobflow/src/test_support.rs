//! Test-only helpers for building deterministic flows.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::oneshot;

use crate::cancel::listener_from;
use crate::control::Signal;
use crate::job::Job;

/// Records the order in which jobs ran.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().expect("recorder lock").push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("recorder lock").clone()
    }

    /// Job that records `name` and succeeds.
    pub fn job(&self, name: &str) -> Job {
        let rec = self.clone();
        let event = name.to_string();
        Job::new(name, move |_, _| {
            rec.record(event.clone());
            async { Ok(()) }
        })
    }

    /// Job that records `name`, then returns an error without touching Control.
    pub fn failing_job(&self, name: &str) -> Job {
        let rec = self.clone();
        let event = name.to_string();
        Job::new(name, move |_, _| {
            rec.record(event.clone());
            let event = event.clone();
            async move { Err(anyhow!("{event} failed")) }
        })
    }

    /// Job that records `name` and reports `message` into the accumulator under `name`.
    pub fn reporting_job(&self, name: &str, message: &str) -> Job {
        let rec = self.clone();
        let event = name.to_string();
        let message = message.to_string();
        Job::new(name, move |ctx, _| {
            rec.record(event.clone());
            let event = event.clone();
            let message = message.clone();
            async move {
                ctx.errors()?.add(event, message);
                Ok(())
            }
        })
    }

    /// Job that sleeps for `delay`, then records `name`. Ignores cancellation.
    pub fn sleeping_job(&self, name: &str, delay: Duration) -> Job {
        let rec = self.clone();
        let event = name.to_string();
        Job::new(name, move |_, _| {
            let rec = rec.clone();
            let event = event.clone();
            async move {
                tokio::time::sleep(delay).await;
                rec.record(event);
                Ok(())
            }
        })
    }

    /// Job that records `name`, then blocks until the flow is done.
    pub fn blocking_job(&self, name: &str) -> Job {
        let rec = self.clone();
        let event = name.to_string();
        Job::new(name, move |ctx, _| {
            rec.record(event.clone());
            async move {
                ctx.done().await;
                Ok(())
            }
        })
    }
}

/// Manually triggered signal source for the cancellation listener.
pub struct ManualSignal {
    tx: Option<oneshot::Sender<Signal>>,
}

impl ManualSignal {
    /// Returns the trigger and a listener job wired to it.
    pub fn pair() -> (Self, Job) {
        let (tx, rx) = oneshot::channel();
        let rx = Arc::new(Mutex::new(Some(rx)));
        let listener = listener_from(move || {
            let rx = rx.lock().expect("signal lock").take();
            async move {
                match rx {
                    Some(rx) => rx.await.ok(),
                    None => None,
                }
            }
        });
        (Self { tx: Some(tx) }, listener)
    }

    pub fn raise(&mut self, signal: Signal) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(signal);
        }
    }
}
