use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::time::Instant;

use std::sync::Arc;
use timeoutd_core::config::SchedulerConfig;
use timeoutd_services::{Notifier, ReceiveOutcome, Scheduler};

use crate::*;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// svc1 with a 2s timeout: nothing before 2.0s, exactly one notification by
/// 2.1s, and the key is gone from the index afterwards.
#[tokio::test(start_paused = true)]
async fn test_single_key_expires_once() {
    let (sched, mut rx) = recording_scheduler(200, 4);
    sched.start().await;

    let t0 = Instant::now();
    sched.receive("svc1", 2, "192.168.1.20").await;

    tokio::time::sleep(ms(1999)).await;
    assert!(drain(&mut rx).is_empty());

    tokio::time::sleep(ms(101)).await;
    let fired = drain(&mut rx);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].key, "svc1");
    assert_eq!(fired[0].address, "192.168.1.20");
    assert!(fired[0].at - t0 >= Duration::from_secs(2));
    assert!(fired[0].at - t0 <= ms(2100));
    assert!(!sched.contains("svc1").await);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(drain(&mut rx).is_empty());

    sched.stop().await;
}

/// A steady keepalive stream keeps a key alive indefinitely.
#[tokio::test(start_paused = true)]
async fn test_regular_keepalives_never_expire() {
    let (sched, mut rx) = recording_scheduler(200, 4);
    sched.start().await;

    for _ in 0..20 {
        assert_ne!(
            sched.receive("node.web1", 10, "10.0.0.1").await,
            ReceiveOutcome::Rejected
        );
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    assert!(drain(&mut rx).is_empty());

    // Then the node goes quiet.
    tokio::time::sleep(Duration::from_secs(11)).await;
    let fired = drain(&mut rx);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].key, "node.web1");

    sched.stop().await;
}

/// Keys expire in deadline order regardless of registration order.
#[tokio::test(start_paused = true)]
async fn test_expiry_order_follows_deadlines() {
    let (sched, mut rx) = recording_scheduler(200, 1);
    sched.start().await;

    sched.receive("c", 3, "x").await;
    sched.receive("a", 1, "x").await;
    sched.receive("b", 2, "x").await;

    tokio::time::sleep(ms(3500)).await;
    let keys: Vec<_> = drain(&mut rx).into_iter().map(|f| f.key).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);

    sched.stop().await;
}

/// Cancelled keys never reach a worker.
#[tokio::test(start_paused = true)]
async fn test_cancel_before_expiry() {
    let (sched, mut rx) = recording_scheduler(200, 4);
    sched.start().await;

    sched.receive("svc", 1, "x").await;
    sched.receive("keep", 1, "x").await;
    assert_eq!(sched.receive("svc", 0, "x").await, ReceiveOutcome::Cancelled);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let keys: Vec<_> = drain(&mut rx).into_iter().map(|f| f.key).collect();
    assert_eq!(keys, vec!["keep"]);

    sched.stop().await;
}

/// Full table: new keys bounce, existing keys renew, and expiry frees room.
#[tokio::test(start_paused = true)]
async fn test_admission_ceiling_recovers_after_expiry() {
    let (sched, mut rx) = recording_scheduler(3, 2);
    sched.start().await;

    for key in ["a", "b", "c"] {
        assert_eq!(sched.receive(key, 5, "x").await, ReceiveOutcome::Created);
    }
    assert_eq!(sched.receive("d", 5, "x").await, ReceiveOutcome::Rejected);
    assert_eq!(sched.receive("a", 1, "x").await, ReceiveOutcome::Refreshed);
    assert_eq!(sched.len().await, 3);

    tokio::time::sleep(ms(1500)).await;
    assert_eq!(drain(&mut rx).len(), 1);
    assert_eq!(sched.receive("d", 5, "x").await, ReceiveOutcome::Created);

    sched.stop().await;
}

/// Many keys with the same deadline all fire, each exactly once.
#[tokio::test(start_paused = true)]
async fn test_simultaneous_expiry_burst() {
    let (sched, mut rx) = recording_scheduler(200, 4);
    sched.start().await;

    for i in 0..100 {
        sched.receive(&format!("node.{}", i), 1, "x").await;
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    let mut keys: Vec<_> = drain(&mut rx).into_iter().map(|f| f.key).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 100);
    assert!(sched.is_empty().await);

    sched.stop().await;
}

/// Notifier that blocks until released.
struct Stalled {
    release: Arc<Notify>,
    calls: tokio::sync::mpsc::UnboundedSender<String>,
}

impl Notifier for Stalled {
    fn notify<'a>(&'a self, key: &'a str, _address: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let _ = self.calls.send(key.to_string());
            if key == "stuck" {
                self.release.notified().await;
            }
        })
    }
}

/// A hung notification occupies one worker; the rest keep going.
#[tokio::test(start_paused = true)]
async fn test_stalled_notification_blocks_only_its_worker() {
    let release = Arc::new(Notify::new());
    let (calls_tx, mut calls) = tokio::sync::mpsc::unbounded_channel();
    let config = SchedulerConfig {
        workers: 2,
        ..Default::default()
    };
    let sched = Scheduler::new(
        &config,
        Arc::new(Stalled {
            release: release.clone(),
            calls: calls_tx,
        }),
    );
    sched.start().await;

    sched.receive("stuck", 1, "x").await;
    tokio::time::sleep(ms(1100)).await;
    assert_eq!(calls.try_recv().unwrap(), "stuck");

    sched.receive("later", 1, "x").await;
    tokio::time::sleep(ms(1100)).await;
    assert_eq!(calls.try_recv().unwrap(), "later");

    release.notify_one();
    sched.stop().await;
}

/// Concurrent refreshes and cancels from many tasks: the table never exceeds
/// its ceiling, counts stay consistent, and every surviving key fires once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_receive_storm() {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TASKS: usize = 16;
    const CALLS: usize = 200;
    const KEYS: usize = 120;

    let (sched, mut rx) = recording_scheduler(50, 4);
    sched.start().await;

    let created = Arc::new(AtomicUsize::new(0));
    let cancelled = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();
    for t in 0..TASKS {
        let sched = sched.clone();
        let created = created.clone();
        let cancelled = cancelled.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..CALLS {
                let key = format!("node.{}", (t * 7919 + i * 31) % KEYS);
                let timeout = if i % 5 == 0 { 0 } else { 30 };
                match sched.receive(&key, timeout, "10.0.0.9").await {
                    ReceiveOutcome::Created => {
                        created.fetch_add(1, Ordering::Relaxed);
                    }
                    ReceiveOutcome::Cancelled => {
                        cancelled.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
                assert!(sched.len().await <= 50);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let len = sched.len().await;
    assert!(len <= 50);
    assert_eq!(
        created.load(Ordering::Relaxed) - cancelled.load(Ordering::Relaxed),
        len
    );

    // Pull every survivor's deadline in and let it expire.
    let mut survivors = HashSet::new();
    for k in 0..KEYS {
        let key = format!("node.{}", k);
        if sched.contains(&key).await {
            assert_eq!(sched.receive(&key, 1, "10.0.0.9").await, ReceiveOutcome::Refreshed);
            survivors.insert(key);
        }
    }
    assert_eq!(survivors.len(), len);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let fired = drain(&mut rx);
    let unique: HashSet<_> = fired.iter().map(|f| f.key.clone()).collect();
    assert_eq!(fired.len(), len);
    assert_eq!(unique, survivors);
    assert!(sched.is_empty().await);

    sched.stop().await;
}
