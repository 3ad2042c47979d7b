//! End-to-end flow tests: one invocation from builder to outcome.
//!
//! Covers cancellation while blocked, concurrent error reporting, the
//! invocation-level timeout and a full producer/consumer command.

use std::sync::Arc;
use std::time::Duration;

use jobflow::combinators::parallel;
use jobflow::control::{Outcome, OutcomeKind, Signal};
use jobflow::errors::FlowError;
use jobflow::exit_codes;
use jobflow::flow::Invocation;
use jobflow::job::Job;
use jobflow::report;
use jobflow::stream::{DEFAULT_BUFFER, run_pair};
use jobflow::test_support::{ManualSignal, Recorder};
use tokio::sync::Mutex;

#[tokio::test]
async fn interrupt_while_blocked_cancels_the_flow() {
    let rec = Recorder::new();
    let (mut signal, listener) = ManualSignal::pair();
    let invocation = Invocation::new("kube-inspect serve")
        .prepend_init(rec.job("init"))
        .run(rec.blocking_job("serve"));
    let control = invocation.control().clone();

    let flow = tokio::spawn(invocation.execute_with(listener));
    while rec.events().len() < 2 {
        tokio::task::yield_now().await;
    }
    signal.raise(Signal::Interrupt);
    let outcome = flow.await.expect("join");

    assert!(matches!(
        outcome,
        Outcome::Canceled {
            signal: Signal::Interrupt
        }
    ));
    assert_eq!(control.double_fires(), 0);
    assert_eq!(report::exit_code(&outcome), exit_codes::CANCELED);
    assert_eq!(
        report::render("kube-inspect serve", &outcome).as_deref(),
        Some("kube-inspect serve canceled by user (interrupt)")
    );
}

#[tokio::test]
async fn concurrent_reports_are_all_observed() {
    let rec = Recorder::new();
    let (_signal, listener) = ManualSignal::pair();
    let run = parallel(
        "checks",
        vec![
            rec.reporting_job("jobA", "errA"),
            rec.reporting_job("jobB", "errB"),
        ],
    );
    let outcome = Invocation::new("checks")
        .run(run)
        .execute_with(listener)
        .await;

    let Outcome::Failed {
        error: FlowError::Accumulated(tree),
        ..
    } = &outcome
    else {
        panic!("expected accumulated failure, got {outcome:?}");
    };
    assert_eq!(tree.messages("jobA"), vec!["errA"]);
    assert_eq!(tree.messages("jobB"), vec!["errB"]);
    assert_eq!(report::exit_code(&outcome), exit_codes::FAILED);
}

#[tokio::test(start_paused = true)]
async fn deadline_fails_the_flow_and_orphan_finishes_later() {
    let rec = Recorder::new();
    let (_signal, listener) = ManualSignal::pair();
    let invocation = Invocation::new("ux-export export")
        .timeout(Some(Duration::from_millis(100)))
        .run(rec.sleeping_job("slow", Duration::from_millis(500)));
    let control = invocation.control().clone();

    let started = tokio::time::Instant::now();
    let outcome = invocation.execute_with(listener).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(150), "{elapsed:?}");
    match &outcome {
        Outcome::Failed { error, .. } => assert!(error.is_timeout(), "{error}"),
        other => panic!("expected timeout failure, got {other:?}"),
    }
    assert!(rec.events().is_empty());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(rec.events(), vec!["slow"]);
    // The orphan's sequence stops at the settled Control; the terminal job never fires.
    assert_eq!(control.double_fires(), 0);
    assert_eq!(control.outcome().kind(), OutcomeKind::Failed);
}

#[tokio::test]
async fn streaming_command_completes_with_items_in_order() {
    let (_signal, listener) = ManualSignal::pair();
    let printed = Arc::new(Mutex::new(Vec::new()));
    let sink = printed.clone();

    let run = Job::new("list", move |ctx, _control| {
        let sink = sink.clone();
        async move {
            run_pair(
                &ctx,
                "list",
                DEFAULT_BUFFER,
                |mut tx| async move {
                    for item in ["A", "B", "C"] {
                        tx.send(item).await?;
                    }
                    Ok(())
                },
                move |rx| async move {
                    sink.lock().await.extend(rx.collect().await);
                    Ok(())
                },
            )
            .await?;
            Ok(())
        }
    });

    let outcome = Invocation::new("secrets list")
        .run(run)
        .execute_with(listener)
        .await;

    assert_eq!(outcome.kind(), OutcomeKind::Completed);
    assert_eq!(*printed.lock().await, vec!["A", "B", "C"]);
    assert_eq!(report::render("secrets list", &outcome), None);
}

#[tokio::test]
async fn producer_failure_surfaces_in_the_report() {
    let (_signal, listener) = ManualSignal::pair();
    let run = Job::new("list", |ctx, _control| async move {
        run_pair(
            &ctx,
            "list",
            DEFAULT_BUFFER,
            |mut tx| async move {
                tx.send(1u32).await?;
                anyhow::bail!("provider unreachable")
            },
            |rx| async move {
                rx.collect().await;
                Ok(())
            },
        )
        .await?;
        Ok(())
    });

    let outcome = Invocation::new("secrets list")
        .message("secrets listed")
        .run(run)
        .execute_with(listener)
        .await;

    assert_eq!(
        report::render("secrets list", &outcome).as_deref(),
        Some("secrets list failed: secrets listed (1 error(s))\n  list:\n    producer: provider unreachable")
    );
}
