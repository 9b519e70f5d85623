//! Common test utilities shared across test files.
//!
//! Items here may not be used by all test files, hence the module-level allow.
#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use walletgate_core::test_utils::MockWallet;
use walletgate_core::{
    GrantOptions, PendingRequestSnapshot, PermissionEvent, PermissionRequest, PermissionsConfig,
    PermissionsManager, PermissionsManagerBuilder,
};

pub const ADMIN: &str = "admin.wallet.local";
pub const APP: &str = "app.example.com";

// ===== Manager Construction =====

pub struct Harness {
    pub manager: Arc<PermissionsManager>,
    pub wallet: Arc<MockWallet>,
    pub clock: TestClock,
}

pub fn harness() -> Harness {
    harness_with(PermissionsConfig::new(ADMIN), |builder| builder)
}

pub fn harness_with_config(config: PermissionsConfig) -> Harness {
    harness_with(config, |builder| builder)
}

pub fn harness_with(
    config: PermissionsConfig,
    customize: impl FnOnce(PermissionsManagerBuilder) -> PermissionsManagerBuilder,
) -> Harness {
    let wallet = Arc::new(MockWallet::new());
    let clock = TestClock::new();
    let builder = PermissionsManager::builder()
        .wallet(wallet.clone())
        .with_config(config)
        .with_clock(clock.source());
    let manager = customize(builder).build().unwrap();
    Harness {
        manager: Arc::new(manager),
        wallet,
        clock,
    }
}

// ===== Controllable Clock =====

/// A clock tests can move forward.
#[derive(Clone)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self::at("2026-01-15T12:00:00Z")
    }

    pub fn at(rfc3339: &str) -> Self {
        let now = DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc);
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, by: ChronoDuration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, rfc3339: &str) {
        *self.now.lock().unwrap() = DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc);
    }

    pub fn source(&self) -> impl Fn() -> DateTime<Utc> + Send + Sync + 'static {
        let now = self.now.clone();
        move || *now.lock().unwrap()
    }
}

// ===== Handlers =====

/// Counts invocations and keeps every request it saw.
#[derive(Clone, Default)]
pub struct RequestCollector {
    count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<PermissionRequest>>>,
}

impl RequestCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, manager: &PermissionsManager, event: PermissionEvent) {
        let collector = self.clone();
        manager.bind_callback(event, move |request: &PermissionRequest| {
            collector.count.fetch_add(1, Ordering::SeqCst);
            collector.requests.lock().unwrap().push(request.clone());
        });
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PermissionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last(&self) -> PermissionRequest {
        self.requests().pop().expect("no request collected")
    }
}

/// Grant every request for `event` as soon as it is raised.
pub fn auto_grant(manager: &PermissionsManager, event: PermissionEvent, options: GrantOptions) {
    manager.bind_callback(event, move |request: &PermissionRequest| {
        let request = request.clone();
        let options = options.clone();
        tokio::spawn(async move { request.grant(options).await });
    });
}

/// Deny every request for `event` as soon as it is raised.
pub fn auto_deny(manager: &PermissionsManager, event: PermissionEvent) {
    manager.bind_callback(event, |request: &PermissionRequest| {
        let request = request.clone();
        tokio::spawn(async move { request.deny().await });
    });
}

// ===== Waiting =====

/// Poll until a pending request with at least `waiters` waiters exists.
pub async fn wait_for_pending(
    manager: &PermissionsManager,
    waiters: usize,
) -> PendingRequestSnapshot {
    for _ in 0..200 {
        if let Some(pending) = manager
            .pending_requests()
            .into_iter()
            .find(|p| p.waiters >= waiters)
        {
            return pending;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no pending request with {} waiters", waiters);
}

/// Run `future`, failing the test if it does not complete promptly.
pub async fn completes<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("operation did not complete; is it waiting on a permission request?")
}
