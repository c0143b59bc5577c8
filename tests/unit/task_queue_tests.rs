//! Task queue ordering, failure isolation and capacity

use std::sync::{Arc, Mutex};
use std::time::Duration;
use perflayer::{AsyncProcessorConfig, PerfError, TaskId, TaskPriority, TaskQueue, TaskStatus};
use tokio::sync::oneshot;
use tokio_test::assert_ok;

fn queue_config(max_workers: usize, queue_size: usize) -> AsyncProcessorConfig {
    AsyncProcessorConfig {
        max_workers,
        queue_size,
        history_size: 100,
        drain_timeout: 1.0,
    }
}

/// Submit a task that occupies the worker until the returned sender fires
async fn block_worker(queue: &TaskQueue<usize>) -> oneshot::Sender<()> {
    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    queue
        .submit("gate", TaskPriority::Critical, async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok(0)
        })
        .await
        .unwrap();
    started_rx.await.unwrap();
    release_tx
}

#[tokio::test]
async fn test_high_priority_runs_before_earlier_lows() {
    let queue = TaskQueue::new(&queue_config(1, 10));
    let order = Arc::new(Mutex::new(Vec::new()));
    let release = block_worker(&queue).await;

    let mut ids = Vec::new();
    for (label, priority) in [("low-1", TaskPriority::Low), ("high", TaskPriority::High), ("low-2", TaskPriority::Low)] {
        let order = Arc::clone(&order);
        let id = queue
            .submit(label, priority, async move {
                order.lock().unwrap().push(label);
                Ok(1)
            })
            .await
            .unwrap();
        ids.push(id);
    }

    release.send(()).unwrap();
    for id in &ids {
        queue.wait(id, Duration::from_secs(1)).await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec!["high", "low-1", "low-2"]);
    queue.shutdown(Duration::from_secs(1)).await;
}

async fn explode() -> anyhow::Result<usize> {
    panic!("worker must survive")
}

#[tokio::test]
async fn test_failing_task_does_not_stop_later_tasks() {
    let queue = TaskQueue::new(&queue_config(1, 10));

    let failing = queue
        .submit("failing", TaskPriority::Normal, async { Err(anyhow::anyhow!("bad input")) })
        .await
        .unwrap();
    let panicking = queue
        .submit("panicking", TaskPriority::Normal, explode())
        .await
        .unwrap();
    let healthy = queue
        .submit("healthy", TaskPriority::Normal, async { Ok(5) })
        .await
        .unwrap();

    assert_eq!(queue.wait(&healthy, Duration::from_secs(1)).await.unwrap(), 5);

    match queue.result(&failing) {
        Err(PerfError::TaskFailed { message, .. }) => assert!(message.contains("bad input")),
        other => panic!("expected task failure, got {:?}", other),
    }
    assert_eq!(queue.status(&failing), Some(TaskStatus::Failed));
    assert!(queue.info(&failing).and_then(|info| info.error).is_some());
    assert_eq!(queue.status(&panicking), Some(TaskStatus::Failed));

    let stats = queue.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 2);
    queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_three_sleeping_tasks_complete() {
    let queue = TaskQueue::new(&queue_config(4, 10));

    let mut ids = Vec::new();
    for index in 0..3usize {
        let id = queue
            .submit(&format!("sleep-{}", index), TaskPriority::Normal, async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(index)
            })
            .await
            .unwrap();
        ids.push(id);
    }

    let mut results = Vec::new();
    for id in &ids {
        results.push(queue.wait(id, Duration::from_secs(1)).await.unwrap());
        assert_eq!(queue.status(id), Some(TaskStatus::Completed));
    }
    results.sort();
    assert_eq!(results, vec![0, 1, 2]);
    queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_unknown_task_and_wait_timeout_are_distinct() {
    let queue = TaskQueue::new(&queue_config(1, 10));
    assert!(matches!(queue.result(&TaskId::new()), Err(PerfError::NotFound { .. })));

    let release = block_worker(&queue).await;
    let waiting = queue
        .submit("waiting", TaskPriority::Normal, async { Ok(1) })
        .await
        .unwrap();

    assert!(matches!(queue.result(&waiting), Err(PerfError::NotReady { .. })));
    assert!(matches!(
        queue.wait(&waiting, Duration::from_millis(20)).await,
        Err(PerfError::Timeout { .. })
    ));

    release.send(()).unwrap();
    assert_eq!(queue.wait(&waiting, Duration::from_secs(1)).await.unwrap(), 1);
    queue.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_try_submit_rejects_full_queue_and_cancel_frees_it() {
    let queue = TaskQueue::new(&queue_config(1, 1));
    let release = block_worker(&queue).await;

    let queued = assert_ok!(queue.try_submit("queued", TaskPriority::Normal, async { Ok(1) }));
    match queue.try_submit("overflow", TaskPriority::Normal, async { Ok(2) }) {
        Err(PerfError::CapacityExceeded { capacity, .. }) => assert_eq!(capacity, 1),
        other => panic!("expected capacity error, got {:?}", other),
    }

    assert!(queue.cancel(&queued).unwrap());
    assert_eq!(queue.status(&queued), Some(TaskStatus::Cancelled));
    assert!(matches!(queue.result(&queued), Err(PerfError::TaskCancelled { .. })));
    assert_ok!(queue.try_submit("retry", TaskPriority::Normal, async { Ok(3) }));

    release.send(()).unwrap();
    queue.shutdown(Duration::from_secs(1)).await;
    assert_eq!(queue.stats().cancelled, 1);
}
