//! Stand-in collaborators for the CLI and for tests.
//!
//! `SimulatedAudio` replays a fixed average level, and
//! `SimulatedLocationProvider` behaves like a continuous location stream that
//! can also be driven by hand.

use crate::domain::model::{AuthorizationStatus, Coordinate};
use crate::domain::ports::{AudioService, LocationDelegate, LocationStreamProvider};
use crate::utils::error::{Result, SurveyError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Audio engine that "measures" a configured average level.
pub struct SimulatedAudio {
    permission: AtomicBool,
    average: f64,
    swing: f64,
    failure: Option<String>,
    sampling_since: Mutex<Option<Instant>>,
    stop: Notify,
    samples_started: AtomicUsize,
    stop_requests: AtomicUsize,
}

impl SimulatedAudio {
    pub fn new(average: f64) -> Self {
        Self {
            permission: AtomicBool::new(true),
            average,
            swing: 0.0,
            failure: None,
            sampling_since: Mutex::new(None),
            stop: Notify::new(),
            samples_started: AtomicUsize::new(0),
            stop_requests: AtomicUsize::new(0),
        }
    }

    /// Microphone permission is refused.
    pub fn denied() -> Self {
        let audio = Self::new(0.0);
        audio.permission.store(false, Ordering::SeqCst);
        audio
    }

    /// Sampling runs its full duration and then fails with `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::new(0.0)
        }
    }

    /// Instantaneous readings oscillate by `swing` dB around the average.
    pub fn with_swing(mut self, swing: f64) -> Self {
        self.swing = swing;
        self
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    pub fn samples_started(&self) -> usize {
        self.samples_started.load(Ordering::SeqCst)
    }

    pub fn stop_requests(&self) -> usize {
        self.stop_requests.load(Ordering::SeqCst)
    }

    pub fn is_sampling(&self) -> bool {
        lock(&self.sampling_since).is_some()
    }
}

#[async_trait]
impl AudioService for SimulatedAudio {
    async fn request_microphone_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn current_level(&self) -> f64 {
        match *lock(&self.sampling_since) {
            Some(since) => {
                let t = since.elapsed().as_secs_f64();
                self.average + self.swing * (t * std::f64::consts::PI).sin()
            }
            None => 0.0,
        }
    }

    async fn sample(&self, duration: Duration) -> Result<f64> {
        self.samples_started.fetch_add(1, Ordering::SeqCst);
        *lock(&self.sampling_since) = Some(Instant::now());

        let outcome = tokio::select! {
            _ = tokio::time::sleep(duration) => match &self.failure {
                Some(reason) => Err(SurveyError::SamplingFailed { reason: reason.clone() }),
                None => Ok(self.average),
            },
            _ = self.stop.notified() => Err(SurveyError::SamplingFailed {
                reason: "sampling stopped".to_string(),
            }),
        };

        *lock(&self.sampling_since) = None;
        outcome
    }

    fn stop_sampling(&self) {
        self.stop_requests.fetch_add(1, Ordering::SeqCst);
        *lock(&self.sampling_since) = None;
        self.stop.notify_waiters();
    }
}

/// Location stream that reports `fix` every `interval` while tracking.
pub struct SimulatedLocationProvider {
    delegate: Arc<Mutex<Option<Arc<dyn LocationDelegate>>>>,
    fix: Option<Coordinate>,
    interval: Duration,
    grant: AuthorizationStatus,
    tracking: AtomicBool,
    emitter: Mutex<Option<JoinHandle<()>>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    permission_requests: AtomicUsize,
}

impl SimulatedLocationProvider {
    /// A provider that never produces a fix on its own.
    pub fn silent() -> Self {
        Self {
            delegate: Arc::new(Mutex::new(None)),
            fix: None,
            interval: Duration::from_secs(1),
            grant: AuthorizationStatus::Authorized,
            tracking: AtomicBool::new(false),
            emitter: Mutex::new(None),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            permission_requests: AtomicUsize::new(0),
        }
    }

    pub fn with_fix(fix: Coordinate, interval: Duration) -> Self {
        Self {
            fix: Some(fix),
            interval,
            ..Self::silent()
        }
    }

    /// Status reported when permission is requested.
    pub fn granting(mut self, status: AuthorizationStatus) -> Self {
        self.grant = status;
        self
    }

    fn delegate(&self) -> Option<Arc<dyn LocationDelegate>> {
        lock(&*self.delegate).clone()
    }

    pub fn emit(&self, coordinate: Coordinate) {
        if let Some(delegate) = self.delegate() {
            delegate.did_update(coordinate);
        }
    }

    pub fn fail(&self, reason: &str) {
        if let Some(delegate) = self.delegate() {
            delegate.did_fail(SurveyError::LocationUnavailable {
                reason: reason.to_string(),
            });
        }
    }

    pub fn authorize(&self, status: AuthorizationStatus) {
        if let Some(delegate) = self.delegate() {
            delegate.did_change_authorization(status);
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }
}

impl LocationStreamProvider for SimulatedLocationProvider {
    fn set_delegate(&self, delegate: Arc<dyn LocationDelegate>) {
        *lock(&*self.delegate) = Some(delegate);
    }

    fn request_permission(&self) {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        self.authorize(self.grant);
    }

    fn start_tracking(&self) {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.tracking.store(true, Ordering::SeqCst);

        let Some(fix) = self.fix else {
            return;
        };

        let delegate = Arc::clone(&self.delegate);
        let interval = self.interval;
        let emitter = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let current = lock(&*delegate).clone();
                if let Some(delegate) = current {
                    delegate.did_update(fix);
                }
            }
        });

        if let Some(previous) = lock(&self.emitter).replace(emitter) {
            previous.abort();
        }
    }

    fn stop_tracking(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.tracking.store(false, Ordering::SeqCst);
        if let Some(emitter) = lock(&self.emitter).take() {
            emitter.abort();
        }
    }
}
