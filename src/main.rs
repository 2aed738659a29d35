use anyhow::Context;
use clap::Parser;
use noise_survey::domain::ports::GeocodingService;
use noise_survey::utils::error::ErrorSeverity;
use noise_survey::utils::{logger, validation::Validate};
use noise_survey::{
    CliArgs, Configuration, LocalStore, LocationAcquirer, MapRegion, MeasurementOrchestrator,
    NominatimGeocoder, OfflineGeocoder, OrchestratorOptions, Screen, Services, SimulatedAudio,
    SimulatedLocationProvider, SurveyCommand, SurveyError, SurveyFileConfig,
};
use std::sync::Arc;

const DEFAULT_STORE_PATH: &str = "noise-history.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 初始化日誌
    if args.json_logs {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("Starting noise-survey CLI");

    // 載入 TOML 配置
    let mut file_config = match &args.config {
        Some(path) => match SurveyFileConfig::from_file(path) {
            Ok(config) => {
                tracing::info!("📁 Loaded configuration from: {}", path);
                config
            }
            Err(e) => {
                eprintln!("❌ Failed to load config file '{}': {}", path, e);
                eprintln!("💡 Make sure the file exists and is valid TOML format");
                std::process::exit(1);
            }
        },
        None => SurveyFileConfig::default(),
    };

    // 應用命令列覆蓋設定
    args.apply_overrides(&mut file_config);

    // 驗證配置
    if let Err(e) = file_config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let config = Arc::new(file_config.to_configuration());
    if args.verbose {
        tracing::debug!("Effective configuration: {:?}", config);
    }

    let store_path = file_config.storage_path().unwrap_or(DEFAULT_STORE_PATH);
    let store = Arc::new(
        LocalStore::open(store_path, Arc::clone(&config))
            .await
            .with_context(|| format!("opening history file {}", store_path))?,
    );

    let orchestrator = build_orchestrator(&args.command, &file_config, config, store)?;

    if let Err(e) = run(&args.command, &orchestrator).await {
        // 記錄詳細錯誤信息
        tracing::error!(
            "❌ {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}

fn build_orchestrator(
    command: &SurveyCommand,
    file_config: &SurveyFileConfig,
    config: Arc<Configuration>,
    store: Arc<LocalStore>,
) -> anyhow::Result<MeasurementOrchestrator> {
    let fix = file_config.simulated_fix()?;

    let audio = match command {
        SurveyCommand::Measure {
            average_db,
            deny_microphone,
            ..
        } => {
            let audio = SimulatedAudio::new(*average_db).with_swing(3.0);
            audio.set_permission(!deny_microphone);
            audio
        }
        _ => SimulatedAudio::new(0.0),
    };

    let provider = match fix {
        Some(fix) => SimulatedLocationProvider::with_fix(fix, file_config.simulated_delay()),
        None => SimulatedLocationProvider::silent(),
    };

    let geocoder: Arc<dyn GeocodingService> = if file_config.geocoding_enabled() {
        Arc::new(NominatimGeocoder::new(
            file_config.geocoder_endpoint(),
            file_config.geocoder_user_agent(),
            file_config.geocoder_timeout(),
        )?)
    } else {
        tracing::info!("Reverse geocoding disabled");
        Arc::new(OfflineGeocoder)
    };

    let services = Services {
        audio: Arc::new(audio),
        geocoder,
        store,
    };
    let options = OrchestratorOptions {
        location_timeout: file_config.location_timeout(),
        ..OrchestratorOptions::default()
    };

    Ok(MeasurementOrchestrator::with_options(
        config,
        services,
        LocationAcquirer::new(Arc::new(provider)),
        options,
    ))
}

async fn run(
    command: &SurveyCommand,
    orchestrator: &MeasurementOrchestrator,
) -> Result<(), SurveyError> {
    let config = orchestrator.config();

    match command {
        SurveyCommand::Measure { .. } => measure(orchestrator).await,
        SurveyCommand::History => {
            if !config.enable_history {
                println!("History is disabled in this configuration");
                return Ok(());
            }
            print_history(orchestrator).await;
            Ok(())
        }
        SurveyCommand::Export { output } => {
            if !config.enable_export {
                println!("Export is disabled in this configuration");
                return Ok(());
            }
            let csv = orchestrator.export_data().await?;
            match output {
                Some(path) => {
                    tokio::fs::write(path, csv).await?;
                    println!("📁 Exported to: {}", path);
                }
                None => print!("{}", csv),
            }
            Ok(())
        }
        SurveyCommand::QuietIndex => {
            println!("Quiet index today: {}", orchestrator.quiet_index().await);
            Ok(())
        }
        SurveyCommand::Delete { id } => {
            if orchestrator.delete_measurement(id).await? {
                println!("🗑️  Deleted {}", id);
            } else {
                println!("No measurement with id {}", id);
            }
            Ok(())
        }
    }
}

async fn measure(orchestrator: &MeasurementOrchestrator) -> Result<(), SurveyError> {
    let mut state = orchestrator.subscribe();
    orchestrator.start_measurement().await?;
    tracing::info!("🎙️  Measuring, press Ctrl-C to cancel");

    loop {
        let current = state.borrow_and_update().clone();
        match current.screen {
            Screen::Result => break,
            Screen::Measuring => {
                if current.is_measuring {
                    eprint!(
                        "\r🎙️  {:>5.1} dB  [{:>3.0}%]",
                        current.current_decibels,
                        current.measurement_progress * 100.0
                    );
                }
            }
            _ => {
                eprintln!();
                if let Some(alert) = current.pending_alert {
                    eprintln!("⚠️  {}", alert);
                }
                println!("Measurement did not complete");
                return Ok(());
            }
        }

        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    return Err(SurveyError::OrchestratorStopped);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel();
            }
        }
    }
    eprintln!();

    let result = orchestrator.snapshot();
    if let Some(alert) = &result.pending_alert {
        eprintln!("⚠️  {}", alert);
    }
    if let Some(measurement) = result.latest_measurement {
        let location = measurement.location();
        println!(
            "✅ {:.1} dB ({})",
            measurement.decibel_level(),
            measurement.category(orchestrator.config())
        );
        match &location.address {
            Some(address) => println!("📍 {}", address),
            None if measurement.has_fix() => {
                println!("📍 {:.5}, {:.5}", location.latitude, location.longitude)
            }
            None => println!("📍 Location unavailable"),
        }
        println!("🆔 {}", measurement.id());
    }

    Ok(())
}

async fn print_history(orchestrator: &MeasurementOrchestrator) {
    let measurements = orchestrator.measurements().await;
    if measurements.is_empty() {
        println!("No measurements recorded yet");
        return;
    }

    for measurement in &measurements {
        let location = measurement.location();
        let place = location
            .address
            .clone()
            .unwrap_or_else(|| format!("{:.5}, {:.5}", location.latitude, location.longitude));
        println!(
            "{}  {}  {:>5.1} dB  {:<8}  {}",
            measurement.id(),
            measurement.timestamp().format("%Y-%m-%d %H:%M"),
            measurement.decibel_level(),
            measurement.category(orchestrator.config()).label(),
            place
        );
    }

    if let Some(region) = MapRegion::fitting(&measurements) {
        println!(
            "Map region: center {:.4}, {:.4} span {:.4}° x {:.4}°",
            region.center.latitude,
            region.center.longitude,
            region.latitude_delta,
            region.longitude_delta
        );
    }
    println!("Quiet index today: {}", orchestrator.quiet_index().await);
}
