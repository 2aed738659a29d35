//! Measurement lifecycle: permission, timed sampling, post-sampling fix,
//! address lookup, persistence.
//!
//! A single task owns the attempt and is the only writer of
//! [`OrchestratorState`]. The attempt is a [`Phase`] whose futures are
//! polled by that task alongside incoming commands. Dropping a phase
//! therefore cancels everything that belongs to it.

use crate::config::Configuration;
use crate::core::location::{LocationAcquirer, DEFAULT_LOCATION_TIMEOUT};
use crate::domain::model::{
    Coordinate, LocationData, NoiseMeasurement, OrchestratorState, Screen,
};
use crate::domain::ports::{AudioService, GeocodingService, MeasurementStore};
use crate::utils::error::{Result, SurveyError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

pub const MICROPHONE_REQUIRED: &str = "Microphone access is required to measure noise";
pub const NO_QUIET_INDEX: &str = "—";

type Pending<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// External collaborators driven by the orchestrator.
#[derive(Clone)]
pub struct Services {
    pub audio: Arc<dyn AudioService>,
    pub geocoder: Arc<dyn GeocodingService>,
    pub store: Arc<dyn MeasurementStore>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub location_timeout: Duration,
    pub progress_interval: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            location_timeout: DEFAULT_LOCATION_TIMEOUT,
            progress_interval: Duration::from_millis(100),
        }
    }
}

enum Command {
    Start { reply: oneshot::Sender<Result<()>> },
    Navigate(Screen),
    Cancel,
    DismissAlert,
}

struct Sampling {
    started: Instant,
    duration: Duration,
    ticker: Interval,
    completion: Pending<Result<f64>>,
}

enum Phase {
    Idle,
    AwaitingPermission {
        permission: Pending<bool>,
        duration: Duration,
        reply: oneshot::Sender<Result<()>>,
    },
    Sampling(Sampling),
    Finishing(Pending<(NoiseMeasurement, Result<()>)>),
}

enum PhaseEvent {
    Permission(bool),
    Tick,
    SamplingDone(Result<f64>),
    Finished(NoiseMeasurement, Result<()>),
}

impl Phase {
    fn in_flight(&self) -> bool {
        !matches!(self, Phase::Idle)
    }

    async fn next_event(&mut self) -> PhaseEvent {
        match self {
            Phase::Idle => std::future::pending().await,
            Phase::AwaitingPermission { permission, .. } => {
                PhaseEvent::Permission(permission.await)
            }
            Phase::Sampling(sampling) => tokio::select! {
                biased;
                level = &mut sampling.completion => PhaseEvent::SamplingDone(level),
                _ = sampling.ticker.tick() => PhaseEvent::Tick,
            },
            Phase::Finishing(finishing) => {
                let (measurement, saved) = finishing.await;
                PhaseEvent::Finished(measurement, saved)
            }
        }
    }
}

/// Combines the sampling result with whatever location data was obtained.
pub fn assemble_measurement(
    fix: Option<Coordinate>,
    address: Option<String>,
    decibel_level: f64,
    duration: f64,
) -> NoiseMeasurement {
    NoiseMeasurement::new(LocationData::from_fix(fix, address), decibel_level, duration)
}

/// Everything that happens after sampling: fix, address, record, save.
/// Location and geocoding problems only degrade the record.
async fn finish_measurement(
    location: LocationAcquirer,
    geocoder: Arc<dyn GeocodingService>,
    store: Arc<dyn MeasurementStore>,
    location_timeout: Duration,
    decibel_level: f64,
    duration: f64,
) -> (NoiseMeasurement, Result<()>) {
    let fix = match location.get_current_location(location_timeout).await {
        Ok(fix) => fix,
        Err(e) => {
            tracing::warn!("Location request failed: {}", e);
            None
        }
    };

    let address = match fix {
        Some(coordinate) => geocoder.resolve_address(coordinate).await,
        None => {
            tracing::warn!("No location fix; recording sentinel coordinate");
            None
        }
    };

    let measurement = assemble_measurement(fix, address, decibel_level, duration);
    let saved = store.save(&measurement).await;
    (measurement, saved)
}

struct OrchestratorTask {
    config: Arc<Configuration>,
    services: Services,
    location: LocationAcquirer,
    options: OrchestratorOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<OrchestratorState>,
    phase: Phase,
}

enum Event {
    Command(Command),
    Phase(PhaseEvent),
}

impl OrchestratorTask {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Event::Command(command),
                    None => break,
                },
                event = self.phase.next_event() => Event::Phase(event),
            };

            match event {
                Event::Command(command) => self.handle_command(command),
                Event::Phase(event) => self.handle_phase_event(event),
            }
        }

        self.abort_attempt("orchestrator shut down");
        tracing::debug!("Measurement orchestrator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                if self.phase.in_flight() {
                    let _ = reply.send(Err(SurveyError::MeasurementInProgress));
                    return;
                }
                let duration = match self.config.sampling_duration() {
                    Ok(duration) => duration,
                    Err(e) => {
                        tracing::error!("Refusing to start: {}", e);
                        let _ = reply.send(Err(e));
                        return;
                    }
                };
                let audio = Arc::clone(&self.services.audio);
                self.phase = Phase::AwaitingPermission {
                    permission: Box::pin(async move { audio.request_microphone_permission().await }),
                    duration,
                    reply,
                };
            }
            Command::Navigate(screen) => {
                self.abort_attempt("navigated away");
                // The result is only held while the Result screen shows it.
                self.state.send_modify(|state| {
                    state.screen = screen;
                    state.latest_measurement = None;
                });
                tracing::debug!("Navigated to {:?}", screen);
            }
            Command::Cancel => {
                self.abort_attempt("cancelled");
            }
            Command::DismissAlert => {
                self.state.send_modify(|state| state.pending_alert = None);
            }
        }
    }

    fn handle_phase_event(&mut self, event: PhaseEvent) {
        match event {
            PhaseEvent::Permission(granted) => self.on_permission(granted),
            PhaseEvent::Tick => self.on_tick(),
            PhaseEvent::SamplingDone(level) => self.on_sampling_done(level),
            PhaseEvent::Finished(measurement, saved) => self.on_finished(measurement, saved),
        }
    }

    fn on_permission(&mut self, granted: bool) {
        let Phase::AwaitingPermission {
            duration, reply, ..
        } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            return;
        };

        if !granted {
            tracing::warn!("Microphone permission denied");
            self.state
                .send_modify(|state| state.pending_alert = Some(MICROPHONE_REQUIRED.to_string()));
            let _ = reply.send(Err(SurveyError::PermissionDenied {
                message: MICROPHONE_REQUIRED.to_string(),
            }));
            return;
        }

        self.location.start_tracking();

        let started = Instant::now();
        let period = self.options.progress_interval.max(Duration::from_millis(1));
        let first_tick = started.checked_add(period).unwrap_or(started);
        let mut ticker = tokio::time::interval_at(first_tick, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let audio = Arc::clone(&self.services.audio);
        self.phase = Phase::Sampling(Sampling {
            started,
            duration,
            ticker,
            completion: Box::pin(async move { audio.sample(duration).await }),
        });

        self.state.send_modify(|state| {
            state.screen = Screen::Measuring;
            state.is_measuring = true;
            state.measurement_progress = 0.0;
            state.current_decibels = 0.0;
            state.latest_measurement = None;
        });
        tracing::info!("Measurement started ({:?} sampling)", duration);
        let _ = reply.send(Ok(()));
    }

    fn on_tick(&mut self) {
        let Phase::Sampling(sampling) = &self.phase else {
            return;
        };

        let elapsed = sampling.started.elapsed().as_secs_f64();
        let progress = (elapsed / sampling.duration.as_secs_f64()).clamp(0.0, 1.0);
        let level = self.services.audio.current_level();

        self.state.send_modify(|state| {
            state.measurement_progress = state.measurement_progress.max(progress);
            state.current_decibels = level;
        });
    }

    fn on_sampling_done(&mut self, level: Result<f64>) {
        // Dropping the sampling phase stops the progress ticker.
        self.phase = Phase::Idle;

        let average = match level {
            Ok(average) => average,
            Err(e) => {
                tracing::error!("Sampling failed: {}", e);
                self.state.send_modify(|state| {
                    state.is_measuring = false;
                    state.screen = Screen::Home;
                    state.pending_alert = Some(e.user_friendly_message());
                });
                return;
            }
        };

        self.state.send_modify(|state| {
            state.is_measuring = false;
            state.measurement_progress = 1.0;
        });
        tracing::info!("Sampling finished at {:.1} dB; acquiring location", average);

        self.phase = Phase::Finishing(Box::pin(finish_measurement(
            self.location.clone(),
            Arc::clone(&self.services.geocoder),
            Arc::clone(&self.services.store),
            self.options.location_timeout,
            average,
            self.config.measurement_duration,
        )));
    }

    fn on_finished(&mut self, measurement: NoiseMeasurement, saved: Result<()>) {
        self.phase = Phase::Idle;

        let alert = match saved {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!("Measurement {} not persisted: {}", measurement.id(), e);
                Some(e.user_friendly_message())
            }
        };

        tracing::info!(
            "Measurement {} recorded: {:.1} dB ({})",
            measurement.id(),
            measurement.decibel_level(),
            measurement.category(&self.config)
        );

        self.state.send_modify(|state| {
            state.latest_measurement = Some(measurement);
            state.screen = Screen::Result;
            if alert.is_some() {
                state.pending_alert = alert;
            }
        });
    }

    /// Drops the in-flight attempt, if any. Returns whether one was running.
    fn abort_attempt(&mut self, reason: &str) -> bool {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => return false,
            Phase::AwaitingPermission { reply, .. } => {
                let _ = reply.send(Err(SurveyError::MeasurementCancelled {
                    reason: reason.to_string(),
                }));
            }
            Phase::Sampling(_) => self.services.audio.stop_sampling(),
            Phase::Finishing(_) => self.location.cancel_pending(),
        }

        self.state.send_modify(|state| {
            state.is_measuring = false;
            if state.screen == Screen::Measuring {
                state.screen = Screen::Home;
            }
        });
        tracing::info!("Measurement attempt aborted: {}", reason);
        true
    }
}

/// Cloneable handle used by presentation code. The orchestrator task ends,
/// cancelling any attempt, when the last handle is dropped.
#[derive(Clone)]
pub struct MeasurementOrchestrator {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<OrchestratorState>,
    store: Arc<dyn MeasurementStore>,
    location: LocationAcquirer,
    config: Arc<Configuration>,
}

impl MeasurementOrchestrator {
    pub fn new(config: Arc<Configuration>, services: Services, location: LocationAcquirer) -> Self {
        Self::with_options(config, services, location, OrchestratorOptions::default())
    }

    /// Spawns the orchestrator task and starts location tracking so a fix
    /// is usually cached by the time sampling ends.
    pub fn with_options(
        config: Arc<Configuration>,
        services: Services,
        location: LocationAcquirer,
        options: OrchestratorOptions,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(OrchestratorState::default());

        location.request_permission();
        location.start_tracking();

        let store = Arc::clone(&services.store);
        let task = OrchestratorTask {
            config: Arc::clone(&config),
            services,
            location: location.clone(),
            options,
            commands: commands_rx,
            state: state_tx,
            phase: Phase::Idle,
        };
        tokio::spawn(task.run());

        Self {
            commands: commands_tx,
            state: state_rx,
            store,
            location,
            config,
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Orchestrator is gone; command dropped");
        }
    }

    /// Returns once sampling has begun, or with the reason it did not.
    /// Denied permission also sets `pending_alert`.
    pub async fn start_measurement(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Start { reply })
            .map_err(|_| SurveyError::OrchestratorStopped)?;
        response.await.map_err(|_| SurveyError::OrchestratorStopped)?
    }

    pub fn navigate_to_map(&self) {
        self.send(Command::Navigate(Screen::Map));
    }

    pub fn navigate_to_history(&self) {
        self.send(Command::Navigate(Screen::History));
    }

    pub fn navigate_to_home(&self) {
        self.send(Command::Navigate(Screen::Home));
    }

    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    pub fn dismiss_alert(&self) {
        self.send(Command::DismissAlert);
    }

    pub async fn export_data(&self) -> Result<String> {
        self.store.export_csv().await
    }

    pub async fn quiet_index(&self) -> String {
        match self.store.today_aggregate().await {
            Some(index) => format!("{:.1} dB", index),
            None => NO_QUIET_INDEX.to_string(),
        }
    }

    pub async fn measurements(&self) -> Vec<NoiseMeasurement> {
        self.store.list().await
    }

    pub async fn delete_measurement(&self, id: &str) -> Result<bool> {
        self.store.delete(id).await
    }

    pub fn snapshot(&self) -> OrchestratorState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state.clone()
    }

    pub fn location(&self) -> &LocationAcquirer {
        &self.location
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }
}
