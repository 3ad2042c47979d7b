//! Producer/consumer pairs connected by a bounded channel.
//!
//! The producer owns the only [`StreamSender`]; the channel closes when that
//! sender is dropped, which happens exactly once on every exit path of the
//! producer (return, `?`, panic). The consumer drains [`StreamReceiver::recv`]
//! until it yields `None`. Neither side can see the other's error; both are
//! reported into the error accumulator by [`run_pair`], which joins both tasks
//! before returning.

use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::{Context, ContextError};
use crate::errors::ErrorAccumulator;

/// Channel capacity used when the configuration does not override it.
pub const DEFAULT_BUFFER: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream consumer is gone")]
    Closed,
    #[error("flow finished before the item was delivered")]
    Canceled,
}

/// Sending half, owned by the producer.
#[derive(Debug)]
pub struct StreamSender<T> {
    tx: mpsc::Sender<T>,
    done: CancellationToken,
    sent: usize,
}

impl<T: Send> StreamSender<T> {
    /// Send one item, waiting for buffer space.
    ///
    /// Fails with [`StreamError::Canceled`] once the flow is done and with
    /// [`StreamError::Closed`] if the consumer dropped its receiver.
    pub async fn send(&mut self, item: T) -> Result<(), StreamError> {
        tokio::select! {
            biased;
            _ = self.done.cancelled() => Err(StreamError::Canceled),
            sent = self.tx.send(item) => {
                sent.map_err(|_| StreamError::Closed)?;
                self.sent += 1;
                Ok(())
            }
        }
    }

    /// Items delivered so far.
    pub fn sent(&self) -> usize {
        self.sent
    }
}

/// Receiving half, owned by the consumer.
#[derive(Debug)]
pub struct StreamReceiver<T> {
    rx: mpsc::Receiver<T>,
    received: usize,
}

impl<T> StreamReceiver<T> {
    /// Next item in send order, or `None` once the producer is finished.
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.received += 1;
        }
        item
    }

    /// Drain every remaining item.
    pub async fn collect(mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }

    pub fn received(&self) -> usize {
        self.received
    }
}

/// Bounded channel tied to the flow's `done` token. A zero capacity is raised to one.
pub fn channel<T>(ctx: &Context, capacity: usize) -> (StreamSender<T>, StreamReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        StreamSender {
            tx,
            done: ctx.done_token(),
            sent: 0,
        },
        StreamReceiver { rx, received: 0 },
    )
}

/// How each side of a pair finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairOutcome {
    pub producer_ok: bool,
    pub consumer_ok: bool,
}

impl PairOutcome {
    pub fn is_ok(&self) -> bool {
        self.producer_ok && self.consumer_ok
    }
}

/// Spawn `producer` and `consumer` on a fresh channel and wait for both.
///
/// Failures (errors or panics) are added to the accumulator under
/// `key/producer` and `key/consumer`. Only an unreadable accumulator is
/// returned as an error.
pub async fn run_pair<T, P, PF, C, CF>(
    ctx: &Context,
    key: &str,
    capacity: usize,
    producer: P,
    consumer: C,
) -> Result<PairOutcome, ContextError>
where
    T: Send + 'static,
    P: FnOnce(StreamSender<T>) -> PF,
    PF: Future<Output = anyhow::Result<()>> + Send + 'static,
    C: FnOnce(StreamReceiver<T>) -> CF,
    CF: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let errors = ctx.errors()?;
    let (tx, rx) = channel(ctx, capacity);
    debug!(key, capacity, "starting stream pair");

    let producer = tokio::spawn(producer(tx));
    let consumer = tokio::spawn(consumer(rx));
    let (produced, consumed) = tokio::join!(producer, consumer);

    Ok(PairOutcome {
        producer_ok: record(&errors, key, "producer", produced),
        consumer_ok: record(&errors, key, "consumer", consumed),
    })
}

fn record(
    errors: &ErrorAccumulator,
    key: &str,
    side: &str,
    joined: Result<anyhow::Result<()>, JoinError>,
) -> bool {
    match joined {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            let error = format!("{err:#}");
            warn!(key, side, error = %error, "stream side failed");
            errors.add_at(&[key, side], error);
            false
        }
        Err(join_err) => {
            warn!(key, side, error = %join_err, "stream side panicked");
            errors.add_at(&[key, side], join_err);
            false
        }
    }
}
