use async_trait::async_trait;
use noise_survey::domain::ports::{GeocodingService, MeasurementStore};
use noise_survey::{
    Configuration, Coordinate, LocalStore, LocationAcquirer, MeasurementOrchestrator,
    NoiseCategory, NoiseMeasurement, OrchestratorState, Screen, Services, SimulatedAudio,
    SimulatedLocationProvider, SurveyError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::assert_ok;

const MOSCOW: Coordinate = Coordinate {
    latitude: 55.7558,
    longitude: 37.6173,
};

struct FixedGeocoder {
    address: Option<String>,
    calls: AtomicUsize,
}

impl FixedGeocoder {
    fn new(address: Option<&str>) -> Self {
        Self {
            address: address.map(str::to_string),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GeocodingService for FixedGeocoder {
    async fn resolve_address(&self, _coordinate: Coordinate) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.address.clone()
    }
}

struct Harness {
    orchestrator: MeasurementOrchestrator,
    audio: Arc<SimulatedAudio>,
    provider: Arc<SimulatedLocationProvider>,
    geocoder: Arc<FixedGeocoder>,
    store: Arc<LocalStore>,
}

impl Harness {
    fn new(audio: SimulatedAudio, provider: SimulatedLocationProvider, address: Option<&str>) -> Self {
        let config = Arc::new(Configuration::default());
        let audio = Arc::new(audio);
        let provider = Arc::new(provider);
        let geocoder = Arc::new(FixedGeocoder::new(address));
        let store = Arc::new(LocalStore::in_memory(Arc::clone(&config)));

        let services = Services {
            audio: audio.clone(),
            geocoder: geocoder.clone(),
            store: store.clone(),
        };
        let orchestrator = MeasurementOrchestrator::new(
            config,
            services,
            LocationAcquirer::new(provider.clone()),
        );

        Self {
            orchestrator,
            audio,
            provider,
            geocoder,
            store,
        }
    }

    async fn wait_for(&self, predicate: impl FnMut(&OrchestratorState) -> bool) -> OrchestratorState {
        let mut state = self.orchestrator.subscribe();
        let snapshot = state.wait_for(predicate).await.unwrap().clone();
        snapshot
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_measurement_with_cached_fix() {
    let harness = Harness::new(
        SimulatedAudio::new(72.0),
        SimulatedLocationProvider::with_fix(MOSCOW, Duration::from_secs(1)),
        Some("Moscow"),
    );
    assert_eq!(harness.orchestrator.snapshot().screen, Screen::Home);

    let started = Instant::now();
    assert_ok!(harness.orchestrator.start_measurement().await);

    let measuring = harness.orchestrator.snapshot();
    assert_eq!(measuring.screen, Screen::Measuring);
    assert!(measuring.is_measuring);

    let result = harness.wait_for(|s| s.screen == Screen::Result).await;
    assert!(started.elapsed() >= Duration::from_secs(7));
    assert!(started.elapsed() < Duration::from_secs(8));
    assert!(!result.is_measuring);
    assert_eq!(result.measurement_progress, 1.0);
    assert!(result.pending_alert.is_none());

    let measurement = result.latest_measurement.unwrap();
    assert_eq!(measurement.decibel_level(), 72.0);
    assert_eq!(measurement.duration(), 7.0);
    assert_eq!(measurement.location().latitude, MOSCOW.latitude);
    assert_eq!(measurement.location().longitude, MOSCOW.longitude);
    assert_eq!(measurement.location().address.as_deref(), Some("Moscow"));
    assert_eq!(
        measurement.category(harness.orchestrator.config()),
        NoiseCategory::Loud
    );

    let saved = harness.store.list().await;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id(), measurement.id());
}

#[tokio::test(start_paused = true)]
async fn test_location_timeout_records_sentinel() {
    let harness = Harness::new(
        SimulatedAudio::new(45.0),
        SimulatedLocationProvider::silent(),
        Some("never used"),
    );

    let started = Instant::now();
    assert_ok!(harness.orchestrator.start_measurement().await);
    let result = harness.wait_for(|s| s.screen == Screen::Result).await;

    assert!(started.elapsed() >= Duration::from_secs(22));
    let measurement = result.latest_measurement.unwrap();
    assert_eq!(measurement.location().latitude, 0.0);
    assert_eq!(measurement.location().longitude, 0.0);
    assert!(measurement.location().address.is_none());
    assert!(!measurement.has_fix());
    assert_eq!(harness.geocoder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.store.list().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fix_arriving_after_sampling_is_used() {
    let harness = Harness::new(
        SimulatedAudio::new(30.0),
        SimulatedLocationProvider::silent(),
        Some("Red Square, Moscow"),
    );

    assert_ok!(harness.orchestrator.start_measurement().await);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.orchestrator.snapshot().screen, Screen::Measuring);

    harness.provider.emit(MOSCOW);
    let result = harness.wait_for(|s| s.screen == Screen::Result).await;

    let measurement = result.latest_measurement.unwrap();
    assert!(measurement.has_fix());
    assert_eq!(
        measurement.location().address.as_deref(),
        Some("Red Square, Moscow")
    );
    assert_eq!(
        measurement.category(harness.orchestrator.config()),
        NoiseCategory::Quiet
    );
}

#[tokio::test(start_paused = true)]
async fn test_geocoder_without_address_keeps_coordinates() {
    let harness = Harness::new(
        SimulatedAudio::new(55.0),
        SimulatedLocationProvider::with_fix(MOSCOW, Duration::from_millis(500)),
        None,
    );

    assert_ok!(harness.orchestrator.start_measurement().await);
    let result = harness.wait_for(|s| s.screen == Screen::Result).await;

    let measurement = result.latest_measurement.unwrap();
    assert!(measurement.has_fix());
    assert!(measurement.location().address.is_none());
    assert_eq!(harness.geocoder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_microphone_denied() {
    let harness = Harness::new(
        SimulatedAudio::denied(),
        SimulatedLocationProvider::silent(),
        None,
    );

    let outcome = harness.orchestrator.start_measurement().await;
    assert!(matches!(outcome, Err(SurveyError::PermissionDenied { .. })));

    let state = harness.orchestrator.snapshot();
    assert_eq!(state.screen, Screen::Home);
    assert!(!state.is_measuring);
    assert_eq!(
        state.pending_alert.as_deref(),
        Some("Microphone access is required to measure noise")
    );
    assert_eq!(harness.audio.samples_started(), 0);
    assert!(harness.store.list().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic_and_resets() {
    let harness = Harness::new(
        SimulatedAudio::new(60.0).with_swing(4.0),
        SimulatedLocationProvider::with_fix(MOSCOW, Duration::from_secs(1)),
        None,
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut state = harness.orchestrator.subscribe();
    let recorder = {
        let seen = Arc::clone(&seen);
        tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let snapshot = state.borrow_and_update().clone();
                let done = snapshot.screen == Screen::Result;
                seen.lock().unwrap().push(snapshot.measurement_progress);
                if done {
                    break;
                }
            }
        })
    };

    assert_ok!(harness.orchestrator.start_measurement().await);
    recorder.await.unwrap();

    let progress = seen.lock().unwrap().clone();
    assert!(progress.len() > 10, "expected periodic updates, got {:?}", progress);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));
    assert_eq!(*progress.last().unwrap(), 1.0);

    harness.orchestrator.navigate_to_home();
    harness.wait_for(|s| s.screen == Screen::Home).await;

    assert_ok!(harness.orchestrator.start_measurement().await);
    let restarted = harness.orchestrator.snapshot();
    assert_eq!(restarted.measurement_progress, 0.0);
    assert!(restarted.latest_measurement.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_surfaces_alert() {
    struct FullDisk;

    #[async_trait]
    impl MeasurementStore for FullDisk {
        async fn save(&self, _measurement: &NoiseMeasurement) -> noise_survey::Result<()> {
            Err(SurveyError::PersistenceFailed {
                reason: "no space left on device".to_string(),
            })
        }
        async fn delete(&self, _id: &str) -> noise_survey::Result<bool> {
            Ok(false)
        }
        async fn list(&self) -> Vec<NoiseMeasurement> {
            Vec::new()
        }
        async fn export_csv(&self) -> noise_survey::Result<String> {
            Ok(String::new())
        }
        async fn today_aggregate(&self) -> Option<f64> {
            None
        }
    }

    let services = Services {
        audio: Arc::new(SimulatedAudio::new(68.0)),
        geocoder: Arc::new(FixedGeocoder::new(Some("Moscow"))),
        store: Arc::new(FullDisk),
    };
    let orchestrator = MeasurementOrchestrator::new(
        Arc::new(Configuration::default()),
        services,
        LocationAcquirer::new(Arc::new(SimulatedLocationProvider::with_fix(
            MOSCOW,
            Duration::from_secs(1),
        ))),
    );

    assert_ok!(orchestrator.start_measurement().await);
    let mut state = orchestrator.subscribe();
    let result = state
        .wait_for(|s| s.screen == Screen::Result)
        .await
        .unwrap()
        .clone();

    assert_eq!(result.latest_measurement.unwrap().decibel_level(), 68.0);
    assert_eq!(
        result.pending_alert.as_deref(),
        Some("The measurement was taken but could not be saved")
    );

    orchestrator.dismiss_alert();
    let mut state = orchestrator.subscribe();
    state.wait_for(|s| s.pending_alert.is_none()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_sampling_discards_attempt() {
    let harness = Harness::new(
        SimulatedAudio::new(50.0),
        SimulatedLocationProvider::with_fix(MOSCOW, Duration::from_secs(1)),
        Some("Moscow"),
    );

    assert_ok!(harness.orchestrator.start_measurement().await);
    tokio::time::sleep(Duration::from_secs(3)).await;
    harness.orchestrator.cancel();

    let state = harness.wait_for(|s| s.screen == Screen::Home).await;
    assert!(!state.is_measuring);
    assert!(state.latest_measurement.is_none());
    assert_eq!(harness.audio.stop_requests(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.orchestrator.snapshot().screen, Screen::Home);
    assert!(harness.store.list().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_navigation_during_location_wait_abandons_attempt() {
    let harness = Harness::new(
        SimulatedAudio::new(50.0),
        SimulatedLocationProvider::silent(),
        None,
    );

    assert_ok!(harness.orchestrator.start_measurement().await);
    tokio::time::sleep(Duration::from_secs(9)).await;
    harness.orchestrator.navigate_to_history();

    let state = harness.wait_for(|s| s.screen == Screen::History).await;
    assert!(!state.is_measuring);

    // A fix arriving now must not produce a record.
    harness.provider.emit(MOSCOW);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(harness.store.list().await.is_empty());
    assert!(harness.orchestrator.snapshot().latest_measurement.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected_while_measuring() {
    let harness = Harness::new(
        SimulatedAudio::new(50.0),
        SimulatedLocationProvider::with_fix(MOSCOW, Duration::from_secs(1)),
        None,
    );

    assert_ok!(harness.orchestrator.start_measurement().await);
    let second = harness.orchestrator.start_measurement().await;
    assert!(matches!(second, Err(SurveyError::MeasurementInProgress)));

    harness.wait_for(|s| s.screen == Screen::Result).await;
    assert_eq!(harness.audio.samples_started(), 1);
    assert_eq!(harness.store.list().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_leaving_result_clears_latest_measurement() {
    let harness = Harness::new(
        SimulatedAudio::new(50.0),
        SimulatedLocationProvider::with_fix(MOSCOW, Duration::from_secs(1)),
        None,
    );

    assert_ok!(harness.orchestrator.start_measurement().await);
    harness.wait_for(|s| s.screen == Screen::Result).await;

    harness.orchestrator.navigate_to_map();
    let map = harness.wait_for(|s| s.screen == Screen::Map).await;
    assert!(map.latest_measurement.is_none());
    assert_eq!(harness.store.list().await.len(), 1);

    assert_ok!(harness.orchestrator.start_measurement().await);
    harness.wait_for(|s| s.screen == Screen::Result).await;
    harness.orchestrator.navigate_to_history();
    let history = harness.wait_for(|s| s.screen == Screen::History).await;
    assert!(history.latest_measurement.is_none());

    assert_ok!(harness.orchestrator.start_measurement().await);
    harness.wait_for(|s| s.screen == Screen::Result).await;
    harness.orchestrator.navigate_to_home();
    let home = harness.wait_for(|s| s.screen == Screen::Home).await;
    assert!(home.latest_measurement.is_none());
    assert_eq!(harness.store.list().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_history_export_and_quiet_index() {
    let harness = Harness::new(
        SimulatedAudio::new(38.5),
        SimulatedLocationProvider::with_fix(MOSCOW, Duration::from_secs(1)),
        Some("Moscow"),
    );
    assert_eq!(harness.orchestrator.quiet_index().await, "—");

    assert_ok!(harness.orchestrator.start_measurement().await);
    let result = harness.wait_for(|s| s.screen == Screen::Result).await;
    let id = result.latest_measurement.unwrap().id().to_string();

    assert_eq!(harness.orchestrator.quiet_index().await, "38.5 dB");

    let csv = harness.orchestrator.export_data().await.unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("id,"));
    let row = lines.next().unwrap();
    assert!(row.contains(&id));
    assert!(row.contains("Moscow"));

    assert!(harness.orchestrator.delete_measurement(&id).await.unwrap());
    assert!(harness.orchestrator.measurements().await.is_empty());
    assert!(!harness.orchestrator.delete_measurement(&id).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_orchestrator_stops_sampling() {
    let audio = Arc::new(SimulatedAudio::new(50.0));
    let config = Arc::new(Configuration::default());
    let services = Services {
        audio: audio.clone(),
        geocoder: Arc::new(FixedGeocoder::new(None)),
        store: Arc::new(LocalStore::in_memory(Arc::clone(&config))),
    };
    let orchestrator = MeasurementOrchestrator::new(
        config,
        services,
        LocationAcquirer::new(Arc::new(SimulatedLocationProvider::silent())),
    );

    assert_ok!(orchestrator.start_measurement().await);
    drop(orchestrator);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(audio.stop_requests(), 1);
    assert!(!audio.is_sampling());
}
