//! One-shot location reads on top of a continuous location stream.
//!
//! A single task owns the cached fix, the authorization status and the
//! waiter slot. Handle calls and provider callbacks both arrive on one
//! channel, so every state change is applied in order by that task. The
//! waiter deadline is just another branch of the same `select!`.

use crate::domain::model::{AuthorizationStatus, Coordinate};
use crate::domain::ports::{LocationDelegate, LocationStreamProvider};
use crate::utils::error::{Result, SurveyError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

pub const DEFAULT_LOCATION_TIMEOUT: Duration = Duration::from_secs(15);

type LocationReply = oneshot::Sender<Result<Option<Coordinate>>>;

enum Command {
    RequestPermission,
    StartTracking,
    StopTracking,
    GetLocation {
        timeout: Duration,
        reply: LocationReply,
    },
    CancelPending,
    Update(Coordinate),
    Failed(SurveyError),
    Authorization(AuthorizationStatus),
}

/// Pending one-shot consumer. Resolving moves the reply out, so a resolved
/// slot has nothing left to answer.
enum Waiter {
    Empty,
    Armed {
        reply: LocationReply,
        /// `None` when the timeout is too far out to represent.
        deadline: Option<Instant>,
        timeout: Duration,
    },
    Resolved,
}

impl Waiter {
    fn is_armed(&self) -> bool {
        matches!(self, Waiter::Armed { .. })
    }

    fn deadline(&self) -> Option<Instant> {
        match self {
            Waiter::Armed { deadline, .. } => *deadline,
            _ => None,
        }
    }

    fn take(&mut self) -> Option<(LocationReply, Duration)> {
        match std::mem::replace(self, Waiter::Resolved) {
            Waiter::Armed { reply, timeout, .. } => Some((reply, timeout)),
            idle => {
                *self = idle;
                None
            }
        }
    }
}

/// Delegate handed to the provider. Holds only a weak sender so the
/// provider cannot keep the acquirer task alive.
struct LocationEvents {
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl LocationEvents {
    fn forward(&self, command: Command) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(command);
        }
    }
}

impl LocationDelegate for LocationEvents {
    fn did_update(&self, coordinate: Coordinate) {
        self.forward(Command::Update(coordinate));
    }

    fn did_fail(&self, error: SurveyError) {
        self.forward(Command::Failed(error));
    }

    fn did_change_authorization(&self, status: AuthorizationStatus) {
        self.forward(Command::Authorization(status));
    }
}

struct AcquirerTask {
    provider: Arc<dyn LocationStreamProvider>,
    commands: mpsc::UnboundedReceiver<Command>,
    waiter: Waiter,
    tracking: bool,
    cached: watch::Sender<Option<Coordinate>>,
    status: watch::Sender<AuthorizationStatus>,
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl AcquirerTask {
    async fn run(mut self) {
        loop {
            let deadline = self.waiter.deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = until(deadline) => self.on_deadline(),
            }
        }

        if let Some((reply, _)) = self.waiter.take() {
            let _ = reply.send(Ok(*self.cached.borrow()));
        }
        self.stop_tracking();
        tracing::debug!("Location acquirer stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::RequestPermission => self.provider.request_permission(),
            Command::StartTracking => self.start_tracking(),
            Command::StopTracking => self.stop_tracking(),
            Command::GetLocation { timeout, reply } => self.arm(timeout, reply),
            Command::CancelPending => {
                if let Some((reply, _)) = self.waiter.take() {
                    tracing::debug!("Pending location request cancelled");
                    self.stop_tracking();
                    let _ = reply.send(Ok(None));
                }
            }
            Command::Update(coordinate) => self.on_update(coordinate),
            Command::Failed(error) => self.on_failure(error),
            Command::Authorization(status) => {
                tracing::debug!("Location authorization changed: {:?}", status);
                self.status.send_replace(status);
            }
        }
    }

    fn arm(&mut self, timeout: Duration, reply: LocationReply) {
        if self.waiter.is_armed() {
            let _ = reply.send(Err(SurveyError::LocationBusy));
            return;
        }

        if let Some(coordinate) = *self.cached.borrow() {
            let _ = reply.send(Ok(Some(coordinate)));
            return;
        }

        self.start_tracking();
        self.waiter = Waiter::Armed {
            reply,
            deadline: Instant::now().checked_add(timeout),
            timeout,
        };
        tracing::debug!("Waiting up to {:?} for a location fix", timeout);
    }

    fn on_update(&mut self, coordinate: Coordinate) {
        self.cached.send_replace(Some(coordinate));

        if let Some((reply, _)) = self.waiter.take() {
            tracing::debug!(
                "Location fix ({:.5}, {:.5}) resolved pending request",
                coordinate.latitude,
                coordinate.longitude
            );
            self.stop_tracking();
            let _ = reply.send(Ok(Some(coordinate)));
        }
    }

    fn on_failure(&mut self, error: SurveyError) {
        tracing::warn!("Location provider error: {}", error);

        if let Some((reply, _)) = self.waiter.take() {
            self.stop_tracking();
            let _ = reply.send(Ok(None));
        }
    }

    fn on_deadline(&mut self) {
        if let Some((reply, timeout)) = self.waiter.take() {
            let cached = *self.cached.borrow();
            tracing::warn!(
                "{}; falling back to {}",
                SurveyError::LocationTimeout {
                    seconds: timeout.as_secs_f64()
                },
                if cached.is_some() { "last known fix" } else { "no fix" }
            );
            self.stop_tracking();
            let _ = reply.send(Ok(cached));
        }
    }

    fn start_tracking(&mut self) {
        if !self.tracking {
            self.provider.start_tracking();
            self.tracking = true;
        }
    }

    fn stop_tracking(&mut self) {
        if self.tracking {
            self.provider.stop_tracking();
            self.tracking = false;
        }
    }
}

/// Cloneable handle to the acquirer task. The task ends when the last
/// handle is dropped.
#[derive(Clone)]
pub struct LocationAcquirer {
    commands: mpsc::UnboundedSender<Command>,
    cached: watch::Receiver<Option<Coordinate>>,
    status: watch::Receiver<AuthorizationStatus>,
}

impl LocationAcquirer {
    /// Registers itself as the provider's delegate and spawns the acquirer
    /// task; must be called within a tokio runtime.
    pub fn new(provider: Arc<dyn LocationStreamProvider>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (cached_tx, cached_rx) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(AuthorizationStatus::NotDetermined);

        provider.set_delegate(Arc::new(LocationEvents {
            commands: commands_tx.downgrade(),
        }));

        let task = AcquirerTask {
            provider,
            commands: commands_rx,
            waiter: Waiter::Empty,
            tracking: false,
            cached: cached_tx,
            status: status_tx,
        };
        tokio::spawn(task.run());

        Self {
            commands: commands_tx,
            cached: cached_rx,
            status: status_rx,
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Location acquirer is gone; command dropped");
        }
    }

    pub fn request_permission(&self) {
        self.send(Command::RequestPermission);
    }

    pub fn start_tracking(&self) {
        self.send(Command::StartTracking);
    }

    pub fn stop_tracking(&self) {
        self.send(Command::StopTracking);
    }

    /// Resolves a pending [`get_current_location`](Self::get_current_location)
    /// with `None` and stops tracking. No-op when nothing is pending.
    pub fn cancel_pending(&self) {
        self.send(Command::CancelPending);
    }

    /// Returns the cached fix at once if there is one. Otherwise waits for
    /// the next update, a provider error (`None`), or `timeout` (the last
    /// cached fix, if any).
    ///
    /// Only one call may wait at a time; a concurrent call fails with
    /// [`SurveyError::LocationBusy`].
    pub async fn get_current_location(&self, timeout: Duration) -> Result<Option<Coordinate>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::GetLocation { timeout, reply })
            .map_err(|_| SurveyError::LocationUnavailable {
                reason: "location acquirer has shut down".to_string(),
            })?;

        response.await.map_err(|_| SurveyError::LocationUnavailable {
            reason: "location request dropped".to_string(),
        })?
    }

    pub fn authorization_status(&self) -> AuthorizationStatus {
        *self.status.borrow()
    }

    pub fn subscribe_authorization(&self) -> watch::Receiver<AuthorizationStatus> {
        self.status.clone()
    }

    pub fn last_known_location(&self) -> Option<Coordinate> {
        *self.cached.borrow()
    }
}
