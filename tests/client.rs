//! Priority admission observed from outside the crate: higher-priority requests should be
//! admitted ahead of lower-priority ones queued behind a saturated concurrency limit.

use http2::admission::{Admission, Priority};
use http2::config::AdmissionConfig;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn high_priority_requests_cut_the_line() {
    let admission = Arc::new(Admission::new(&AdmissionConfig {
        global_limit: 1,
        per_host_limit: 1,
    }));
    let order = Arc::new(Mutex::new(Vec::new()));

    let holder = admission.acquire(Priority::Normal, "example.com").await.unwrap();

    let mut handles = Vec::new();
    for (priority, label) in [(Priority::Low, "low"), (Priority::High, "high")] {
        let admission = admission.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            let _permit = admission.acquire(priority, "example.com").await.unwrap();
            order.lock().unwrap().push(label);
        }));
    }

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    drop(holder);
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
}

#[tokio::test]
async fn shutdown_graceful_cancels_queued_waiters() {
    let admission = Arc::new(Admission::new(&AdmissionConfig {
        global_limit: 1,
        per_host_limit: 1,
    }));
    let holder = admission.acquire(Priority::Normal, "example.com").await.unwrap();

    let admission2 = admission.clone();
    let waiter = tokio::spawn(async move { admission2.acquire(Priority::Normal, "example.com").await });
    tokio::task::yield_now().await;

    admission.shutdown_graceful();
    let result = waiter.await.unwrap();
    assert!(result.is_err());
    drop(holder);
}
