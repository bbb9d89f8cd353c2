mod common;

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use common::{init_tracing, process_command, ticks, worker_factory, WorkerOptions};
use procpool::{PoolConfig, PoolError, ProcessPool, Submission};

#[tokio::test]
async fn orderly_shutdown_completes_queued_work() {
    init_tracing();

    let pool = ProcessPool::new(
        worker_factory(WorkerOptions::verified()),
        PoolConfig::new(2, 2, 0),
    )
    .await
    .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        handles.push(pool.submit(Submission::single(process_command(2))).unwrap());
    }
    pool.shutdown();
    assert!(pool.is_shutdown());

    // New work is refused the moment shutdown is initiated.
    let err = pool
        .submit(Submission::single(process_command(1)))
        .unwrap_err();
    assert!(matches!(err, PoolError::SubmissionRejected));

    // Everything accepted before shutdown still completes.
    for handle in &mut handles {
        handle.wait().await.unwrap();
    }

    assert!(pool
        .await_termination(Duration::from_secs(10))
        .await
        .unwrap());
    assert!(pool.is_terminated());
    assert_eq!(pool.num_processes(), 0);
}

#[tokio::test]
async fn force_shutdown_returns_unprocessed_submissions() {
    init_tracing();

    let pool = ProcessPool::new(
        worker_factory(WorkerOptions::verified()),
        PoolConfig::new(1, 1, 0),
    )
    .await
    .unwrap();

    let mut running = pool.submit(Submission::single(process_command(25))).unwrap();
    let mut queued_a = pool.submit(Submission::single(process_command(1))).unwrap();
    let mut queued_b = pool.submit(Submission::single(process_command(1))).unwrap();
    sleep(ticks(1)).await;

    let started = Instant::now();
    let unprocessed = pool.force_shutdown().await;

    // Exactly the never-started submissions come back, commands included.
    let ids: HashSet<_> = unprocessed.iter().map(|u| u.id()).collect();
    assert_eq!(ids, HashSet::from([queued_a.id(), queued_b.id()]));
    assert_eq!(unprocessed[0].commands().len(), 1);

    // All three handles are cancelled: the running one by the kill, the
    // queued ones by the drain.
    for handle in [&mut running, &mut queued_a, &mut queued_b] {
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled), "got {err:?}");
    }

    assert!(pool
        .await_termination(Duration::from_secs(10))
        .await
        .unwrap());
    assert!(pool.is_terminated());
    assert_eq!(pool.num_processes(), 0);
    // The 25-tick command never ran to completion.
    assert!(started.elapsed() < ticks(20));
}

#[tokio::test]
async fn orderly_termination_uses_the_process_protocol() {
    init_tracing();

    let options = WorkerOptions {
        verify_startup: true,
        manual_terminate: true,
        ..WorkerOptions::default()
    };
    let pool = ProcessPool::new(worker_factory(options), PoolConfig::new(1, 1, 0))
        .await
        .unwrap();

    let mut handle = pool.submit(Submission::single(process_command(1))).unwrap();
    handle.wait().await.unwrap();

    // The worker honours `stop`/`bye`; termination completes well within
    // the kill grace period.
    pool.shutdown();
    let started = Instant::now();
    assert!(pool
        .await_termination(Duration::from_secs(10))
        .await
        .unwrap());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn terminate_after_execution_retires_the_process() {
    init_tracing();

    let pool = ProcessPool::new(
        worker_factory(WorkerOptions::verified()),
        PoolConfig::new(1, 2, 0),
    )
    .await
    .unwrap();

    let submission = Submission::single(process_command(1)).terminate_process_after_execution(true);
    let mut handle = pool.submit(submission).unwrap();
    handle.wait().await.unwrap();

    // The hosting process is gone, and the pool replenishes to min_size.
    sleep(Duration::from_millis(800)).await;
    assert_eq!(pool.num_processes(), 1);

    // The replacement is a fresh process that serves new work.
    let mut next = pool.submit(Submission::single(process_command(1))).unwrap();
    next.wait().await.unwrap();

    pool.shutdown();
    assert!(pool
        .await_termination(Duration::from_secs(10))
        .await
        .unwrap());
}

#[tokio::test]
async fn interrupted_construction_aborts_and_reaps() {
    init_tracing();

    let options = WorkerOptions {
        verify_startup: true,
        startup_delay: Some(Duration::from_secs(5)),
        ..WorkerOptions::default()
    };
    let token = CancellationToken::new();
    let construction_token = token.clone();

    let construction = tokio::spawn(async move {
        ProcessPool::with_shutdown_token(
            worker_factory(options),
            PoolConfig::new(2, 4, 0),
            construction_token,
        )
        .await
    });

    sleep(Duration::from_millis(300)).await;
    token.cancel();

    let started = Instant::now();
    let result = construction.await.unwrap();
    assert!(matches!(result.unwrap_err(), PoolError::Interrupted));
    // Construction aborts promptly instead of riding out the slow startup.
    assert!(started.elapsed() < Duration::from_secs(2));
}
