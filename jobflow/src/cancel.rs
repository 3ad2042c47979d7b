//! Cancellation listener: races SIGINT against flow completion.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::control::Signal;
use crate::job::Job;

/// Listener for the process's SIGINT (Ctrl-C).
pub fn cancellation_listener() -> Job {
    listener_from(|| async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Some(Signal::Interrupt),
            Err(err) => {
                error!(%err, "cannot listen for interrupt signal");
                None
            }
        }
    })
}

/// Listener driven by an arbitrary signal source.
///
/// `source` is called once per run. If it yields a signal before the flow is
/// done, Control is cancelled with it; `None` means no signal will ever come
/// and the listener just waits for the flow to finish.
pub fn listener_from<S, Fut>(source: S) -> Job
where
    S: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Signal>> + Send + 'static,
{
    let source = Arc::new(source);
    Job::new("cancellation listener", move |ctx, control| {
        let source = source.clone();
        async move {
            let signal = async move {
                match source().await {
                    Some(signal) => signal,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                biased;
                _ = ctx.done() => debug!("flow finished, listener exiting"),
                signal = signal => {
                    info!(%signal, "signal received, cancelling flow");
                    if let Err(err) = control.cancel(signal) {
                        debug!(%err, "flow settled before the signal was handled");
                    }
                }
            }
            Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::control::{Control, Outcome};
    use crate::test_support::ManualSignal;

    #[tokio::test]
    async fn signal_cancels_running_flow() {
        let control = Control::new();
        let ctx = Context::new("listen", control.token());
        let (mut trigger, listener) = ManualSignal::pair();

        let handle = tokio::spawn(listener.run(ctx, control.clone()));
        trigger.raise(Signal::Interrupt);
        handle.await.expect("join").expect("listener");

        assert!(matches!(
            control.outcome(),
            Outcome::Canceled {
                signal: Signal::Interrupt
            }
        ));
        assert_eq!(control.double_fires(), 0);
    }

    #[tokio::test]
    async fn listener_exits_silently_when_flow_completes() {
        let control = Control::new();
        let ctx = Context::new("listen", control.token());
        let (_trigger, listener) = ManualSignal::pair();

        let handle = tokio::spawn(listener.run(ctx, control.clone()));
        control.complete("finished").expect("complete");
        handle.await.expect("join").expect("listener");

        assert!(matches!(control.outcome(), Outcome::Completed { .. }));
        assert_eq!(control.double_fires(), 0);
    }

    #[tokio::test]
    async fn source_without_signal_waits_for_done() {
        let control = Control::new();
        let ctx = Context::new("listen", control.token());
        let listener = listener_from(|| async { None });

        let handle = tokio::spawn(listener.run(ctx, control.clone()));
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        control.complete("finished").expect("complete");
        handle.await.expect("join").expect("listener");
    }
}
