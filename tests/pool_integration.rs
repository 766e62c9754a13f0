//! End-to-end tests driving the real `taskpool-worker` binary over Unix-domain
//! sockets. Each test gets its own `tempfile::tempdir()` as `work_dir` so
//! sockets never collide across tests running in parallel.

use std::path::PathBuf;
use std::time::Duration;

use taskpool::{ComputeTask, Pool, PoolConfig, PoolError, PoolEvent};

fn worker_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_taskpool-worker"))
}

fn config(work_dir: &std::path::Path) -> PoolConfig {
    PoolConfig::new(work_dir, worker_binary())
}

#[tokio::test]
async fn echo_module_returns_greeting() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Pool::new(config(dir.path()).pool_size(1));
    pool.start().await.unwrap();

    let task = ComputeTask::new(
        "registry://echo",
        serde_json::json!({"name": "World"}),
        Duration::from_secs(2),
    );
    let result = pool.compute(task).await.unwrap();
    assert_eq!(result, serde_json::json!({"greeting": "Hello, World"}));

    pool.stop().await;
}

#[tokio::test]
async fn ten_tasks_complete_with_two_warm_workers() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Pool::new(config(dir.path()).pool_size(2));
    pool.start().await.unwrap();

    let mut joins = Vec::new();
    for i in 0..10 {
        let pool = pool.clone();
        joins.push(tokio::spawn(async move {
            let task = ComputeTask::new(
                "registry://echo",
                serde_json::json!({"name": i.to_string()}),
                Duration::from_secs(5),
            );
            let result = pool.compute(task).await.unwrap();
            assert_eq!(result, serde_json::json!({"greeting": format!("Hello, {i}")}));
        }));
    }
    for join in joins {
        join.await.unwrap();
    }

    pool.stop().await;
}

#[tokio::test]
async fn tasks_overlap_across_warm_workers() {
    // With pool_size=2 and two 200ms sleeps submitted together, total wall
    // time should be close to one sleep's duration, not the sum of both.
    let dir = tempfile::tempdir().unwrap();
    let pool = Pool::new(config(dir.path()).pool_size(2));
    pool.start().await.unwrap();

    let start = std::time::Instant::now();
    let a = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let task = ComputeTask::new("registry://sleep", serde_json::json!({"ms": 200}), Duration::from_secs(2));
            pool.compute(task).await.unwrap();
        })
    };
    let b = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let task = ComputeTask::new("registry://sleep", serde_json::json!({"ms": 200}), Duration::from_secs(2));
            pool.compute(task).await.unwrap();
        })
    };
    a.await.unwrap();
    b.await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(380), "tasks did not overlap");

    pool.stop().await;
}

#[tokio::test]
async fn recycle_threshold_fires_expected_number_of_events() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Pool::new(config(dir.path()).pool_size(1).recycle_threshold(5));
    pool.start().await.unwrap();

    let mut events = pool.subscribe();
    let recycle_counter = tokio::spawn(async move {
        let mut count = 0;
        while let Ok(event) = events.recv().await {
            if matches!(event, PoolEvent::OnRecycle { .. }) {
                count += 1;
            }
            if count == 2 {
                break;
            }
        }
        count
    });

    for i in 0..12 {
        let task = ComputeTask::new(
            "registry://echo",
            serde_json::json!({"name": i.to_string()}),
            Duration::from_secs(5),
        );
        pool.compute(task).await.unwrap();
    }

    let count = tokio::time::timeout(Duration::from_secs(5), recycle_counter)
        .await
        .expect("recycle events were not observed in time")
        .unwrap();
    assert_eq!(count, 2);

    pool.stop().await;
}

#[tokio::test]
async fn crashing_module_recovers_on_retry() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Pool::new(config(dir.path()).pool_size(1).retries(1));
    pool.start().await.unwrap();

    let mut events = pool.subscribe();
    let exit_watch = tokio::spawn(async move {
        loop {
            if let Ok(PoolEvent::OnWorkerExit { .. }) = events.recv().await {
                return;
            }
        }
    });

    let crash_task = ComputeTask::new("registry://crash", serde_json::json!({}), Duration::from_secs(2));
    let err = pool.compute(crash_task).await.unwrap_err();
    assert!(matches!(err, PoolError::Io(_) | PoolError::Protocol(_) | PoolError::WorkerCrash(_)));

    tokio::time::timeout(Duration::from_secs(5), exit_watch)
        .await
        .expect("OnWorkerExit was not observed")
        .unwrap();

    let echo_task = ComputeTask::new(
        "registry://echo",
        serde_json::json!({"name": "after-crash"}),
        Duration::from_secs(5),
    );
    let result = pool.compute(echo_task).await.unwrap();
    assert_eq!(result, serde_json::json!({"greeting": "Hello, after-crash"}));

    pool.stop().await;
}

#[tokio::test]
async fn queue_wait_timeout_rejects_excess_callers() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Pool::new(
        config(dir.path())
            .pool_size(1)
            .queue_wait_timeout(Duration::from_millis(50)),
    );
    pool.start().await.unwrap();

    let long_task = ComputeTask::new("registry://sleep", serde_json::json!({"ms": 500}), Duration::from_secs(2));
    let occupier = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.compute(long_task).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    let overflow_task = ComputeTask::new("registry://echo", serde_json::json!({"name": "queued"}), Duration::from_secs(2));
    let err = pool.compute(overflow_task).await.unwrap_err();
    assert!(matches!(err, PoolError::QueueTimeout(_)));

    occupier.await.unwrap().unwrap();
    pool.stop().await;
}

#[tokio::test]
async fn compute_timeout_surfaces_and_pool_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Pool::new(config(dir.path()).pool_size(1));
    pool.start().await.unwrap();

    let hung_task = ComputeTask::new(
        "registry://sleep_forever",
        serde_json::json!({}),
        Duration::from_millis(100),
    );
    let started = std::time::Instant::now();
    let err = pool.compute(hung_task).await.unwrap_err();
    assert!(matches!(err, PoolError::ComputeTimeout(_)));
    assert!(started.elapsed() >= Duration::from_millis(100));

    let echo_task = ComputeTask::new(
        "registry://echo",
        serde_json::json!({"name": "still-alive"}),
        Duration::from_secs(5),
    );
    let result = pool.compute(echo_task).await.unwrap();
    assert_eq!(result, serde_json::json!({"greeting": "Hello, still-alive"}));

    pool.stop().await;
}
