mod common;

use std::time::Duration;

use tokio::time::{sleep, Instant};

use common::{init_tracing, process_command, ticks, worker_factory, WorkerOptions};
use procpool::{PoolConfig, PoolError, ProcessPool, Submission, SubmissionStatus};

#[tokio::test]
async fn forced_cancel_destroys_the_hosting_process() {
    init_tracing();

    let pool = ProcessPool::new(
        worker_factory(WorkerOptions::verified()),
        PoolConfig::new(2, 4, 0),
    )
    .await
    .unwrap();

    let started = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..2 {
        handles.push(pool.submit(Submission::single(process_command(25))).unwrap());
    }
    sleep(ticks(2)).await;
    for handle in &handles {
        handle.cancel(true);
    }
    for handle in &mut handles {
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled), "got {err:?}");
        assert!(handle.is_cancelled());
    }
    // Nowhere near the 25 ticks the commands would have taken.
    let elapsed = started.elapsed();
    assert!(elapsed < ticks(10), "forced cancel was not prompt: {elapsed:?}");

    // The pool replaces the destroyed processes to hold min_size.
    sleep(Duration::from_millis(800)).await;
    assert!(pool.num_processes() >= 2);

    pool.shutdown();
    assert!(pool
        .await_termination(Duration::from_secs(10))
        .await
        .unwrap());
}

#[tokio::test]
async fn cooperative_cancel_finishes_current_command_only() {
    init_tracing();

    let pool = ProcessPool::new(
        worker_factory(WorkerOptions::verified()),
        PoolConfig::new(1, 2, 0),
    )
    .await
    .unwrap();

    // Second command would dwarf the first; if it ever started, the wait
    // below would take 20 ticks.
    let submission = Submission::new(vec![process_command(2), process_command(20)]);
    let started = Instant::now();
    let mut handle = pool.submit(submission).unwrap();

    sleep(ticks(1)).await;
    handle.cancel(false);

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, PoolError::Cancelled));
    let elapsed = started.elapsed();
    assert!(
        elapsed >= ticks(2),
        "in-flight command must run to completion: {elapsed:?}"
    );
    assert!(
        elapsed < ticks(8),
        "subsequent command must not start: {elapsed:?}"
    );

    // The process survived a cooperative cancel and keeps serving.
    let mut next = pool.submit(Submission::single(process_command(1))).unwrap();
    next.wait().await.unwrap();

    pool.shutdown();
    assert!(pool
        .await_termination(Duration::from_secs(10))
        .await
        .unwrap());
}

#[tokio::test]
async fn cancelling_a_queued_submission_removes_it() {
    init_tracing();

    let pool = ProcessPool::new(
        worker_factory(WorkerOptions::verified()),
        PoolConfig::new(1, 1, 0),
    )
    .await
    .unwrap();

    let mut running = pool.submit(Submission::single(process_command(8))).unwrap();
    let mut queued = pool.submit(Submission::single(process_command(1))).unwrap();

    sleep(ticks(1)).await;
    assert_eq!(pool.num_queued_submissions(), 1);
    queued.cancel(false);

    // The queued submission terminates immediately, long before the
    // running one frees the only executor.
    let waited = Instant::now();
    let err = queued.wait().await.unwrap_err();
    assert!(matches!(err, PoolError::Cancelled));
    assert!(waited.elapsed() < ticks(4));
    assert_eq!(pool.num_queued_submissions(), 0);

    running.wait().await.unwrap();

    pool.shutdown();
    assert!(pool
        .await_termination(Duration::from_secs(10))
        .await
        .unwrap());
}

#[tokio::test]
async fn cancel_is_idempotent() {
    init_tracing();

    let pool = ProcessPool::new(
        worker_factory(WorkerOptions::verified()),
        PoolConfig::new(1, 1, 0),
    )
    .await
    .unwrap();

    let mut handle = pool.submit(Submission::single(process_command(4))).unwrap();
    sleep(ticks(1)).await;

    handle.cancel(false);
    handle.cancel(false);
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, PoolError::Cancelled));
    assert_eq!(handle.status(), SubmissionStatus::Cancelled);

    // A late forced cancel cannot disturb the terminal state.
    handle.cancel(true);
    assert_eq!(handle.status(), SubmissionStatus::Cancelled);

    pool.shutdown();
    assert!(pool
        .await_termination(Duration::from_secs(10))
        .await
        .unwrap());
}

#[tokio::test]
async fn wait_timeout_reports_without_affecting_execution() {
    init_tracing();

    let pool = ProcessPool::new(
        worker_factory(WorkerOptions::verified()),
        PoolConfig::new(1, 1, 0),
    )
    .await
    .unwrap();

    let started = Instant::now();
    let mut handle = pool.submit(Submission::single(process_command(8))).unwrap();

    let err = handle.wait_timeout(ticks(2)).await.unwrap_err();
    assert!(matches!(err, PoolError::WaitTimeout));
    assert!(!handle.is_done());

    // The work was unaffected and still completes.
    handle.wait().await.unwrap();
    assert!(started.elapsed() >= ticks(8));

    pool.shutdown();
    assert!(pool
        .await_termination(Duration::from_secs(10))
        .await
        .unwrap());
}
