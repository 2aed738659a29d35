use crate::config::Configuration;
use crate::domain::model::NoiseMeasurement;
use crate::domain::ports::MeasurementStore;
use crate::utils::error::{Result, SurveyError};
use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Measurement history kept in memory, optionally mirrored to a JSON file.
#[derive(Debug)]
pub struct LocalStore {
    path: Option<PathBuf>,
    config: Arc<Configuration>,
    entries: RwLock<Vec<NoiseMeasurement>>,
}

#[derive(Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    timestamp: String,
    latitude: f64,
    longitude: f64,
    address: &'a str,
    decibel_level: f64,
    duration: f64,
    category: &'static str,
}

impl LocalStore {
    pub fn in_memory(config: Arc<Configuration>) -> Self {
        Self {
            path: None,
            config,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Opens (or starts) a history file. A missing file is an empty history.
    pub async fn open<P: AsRef<Path>>(path: P, config: Arc<Configuration>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(SurveyError::IoError(e)),
        };

        tracing::debug!(
            "Loaded {} measurements from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            path: Some(path),
            config,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, entries: &[NoiseMeasurement]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(entries)?;
        // Write-then-rename keeps the history file whole.
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    fn csv_from(&self, entries: &[NoiseMeasurement]) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        for measurement in entries {
            let location = measurement.location();
            writer.serialize(CsvRow {
                id: measurement.id(),
                timestamp: measurement.timestamp().to_rfc3339(),
                latitude: location.latitude,
                longitude: location.longitude,
                address: location.address.as_deref().unwrap_or(""),
                decibel_level: measurement.decibel_level(),
                duration: measurement.duration(),
                category: measurement.category(&self.config).label(),
            })?;
        }

        if entries.is_empty() {
            writer.write_record([
                "id",
                "timestamp",
                "latitude",
                "longitude",
                "address",
                "decibel_level",
                "duration",
                "category",
            ])?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| SurveyError::IoError(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| SurveyError::PersistenceFailed {
            reason: format!("CSV export is not valid UTF-8: {}", e),
        })
    }
}

fn persistence_failure(error: SurveyError) -> SurveyError {
    match error {
        SurveyError::PersistenceFailed { .. } => error,
        other => SurveyError::PersistenceFailed {
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl MeasurementStore for LocalStore {
    async fn save(&self, measurement: &NoiseMeasurement) -> Result<()> {
        // The in-memory list changes only after the file is written.
        let mut entries = self.entries.write().await;
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.push(measurement.clone());
        next.extend(entries.iter().cloned());

        self.persist(&next).await.map_err(persistence_failure)?;
        *entries = next;

        tracing::debug!("Saved measurement {}", measurement.id());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let Some(index) = entries.iter().position(|m| m.id() == id) else {
            return Ok(false);
        };

        let mut next = entries.clone();
        next.remove(index);

        self.persist(&next).await.map_err(persistence_failure)?;
        *entries = next;

        tracing::debug!("Deleted measurement {}", id);
        Ok(true)
    }

    async fn list(&self) -> Vec<NoiseMeasurement> {
        self.entries.read().await.clone()
    }

    async fn export_csv(&self) -> Result<String> {
        let entries = self.entries.read().await;
        self.csv_from(&entries)
    }

    async fn today_aggregate(&self) -> Option<f64> {
        let today = Local::now().date_naive();
        self.entries
            .read()
            .await
            .iter()
            .filter(|m| m.timestamp().with_timezone(&Local).date_naive() == today)
            .map(|m| m.decibel_level())
            .reduce(f64::min)
    }
}
