use crate::app::{AppUpdate, Telemetry};
use crate::errors::AppError;
use crate::settings::MiscSettings;

use csv_async::AsyncSerializer;
use serde_derive::Serialize;
use std::path::PathBuf;
use tokio::fs::{create_dir_all, File};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver as BReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CSV_FILE_PREFIX: &str = "session-";

#[allow(non_snake_case)]
#[derive(Debug, Serialize)]
struct CsvData {
    Timestamp: String,
    HeartRate: Option<u16>,
    Power: Option<u16>,
    ThreeSecondPower: Option<f64>,
    Cadence: Option<f64>,
}

fn one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl From<&Telemetry> for CsvData {
    fn from(telemetry: &Telemetry) -> Self {
        Self {
            Timestamp: telemetry
                .timestamp
                .format("%Y-%m-%d %H:%M:%S%.3f")
                .to_string(),
            HeartRate: telemetry.heart_rate,
            Power: telemetry.power,
            ThreeSecondPower: telemetry.three_second_power.map(one_decimal),
            Cadence: telemetry.cadence.map(one_decimal),
        }
    }
}

/// Running averages for the end-of-ride summary.
#[derive(Debug, Default, Clone)]
pub struct SessionSummary {
    samples: u64,
    heart_rate_sum: u64,
    heart_rate_count: u64,
    power_sum: u64,
    power_count: u64,
}

impl SessionSummary {
    pub fn record(&mut self, telemetry: &Telemetry) {
        self.samples += 1;
        if let Some(bpm) = telemetry.heart_rate.filter(|bpm| *bpm > 0) {
            self.heart_rate_sum += u64::from(bpm);
            self.heart_rate_count += 1;
        }
        if let Some(watts) = telemetry.power {
            self.power_sum += u64::from(watts);
            self.power_count += 1;
        }
    }
    pub fn samples(&self) -> u64 {
        self.samples
    }
    pub fn average_heart_rate(&self) -> Option<u16> {
        (self.heart_rate_count > 0).then(|| {
            (self.heart_rate_sum as f64 / self.heart_rate_count as f64).round() as u16
        })
    }
    pub fn average_power(&self) -> Option<f64> {
        (self.power_count > 0).then(|| self.power_sum as f64 / self.power_count as f64)
    }
}

struct SessionLogger {
    writer: AsyncSerializer<File>,
    path: PathBuf,
    summary: SessionSummary,
}

impl SessionLogger {
    async fn build(misc_settings: &MiscSettings) -> Result<Self, AppError> {
        let folder = PathBuf::from(&misc_settings.log_sessions_csv_path);
        if !folder.exists() {
            create_dir_all(&folder)
                .await
                .map_err(|e| AppError::CreateDir {
                    path: folder.clone(),
                    source: e,
                })?;
        }
        let file_name = format!(
            "{}{}.csv",
            CSV_FILE_PREFIX,
            chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
        );
        let path = folder.join(file_name);
        let file = File::create(&path)
            .await
            .map_err(|e| AppError::CreateFile {
                path: path.clone(),
                source: e,
            })?;
        Ok(Self {
            writer: AsyncSerializer::from_writer(file),
            path,
            summary: SessionSummary::default(),
        })
    }

    async fn rx_loop(
        &mut self,
        broadcast_rx: &mut BReceiver<AppUpdate>,
        cancel_token: CancellationToken,
    ) -> Result<(), AppError> {
        loop {
            tokio::select! {
                update = broadcast_rx.recv() => {
                    match update {
                        Ok(AppUpdate::Telemetry(telemetry)) => {
                            self.summary.record(&telemetry);
                            self.writer.serialize(CsvData::from(&telemetry)).await?;
                            self.writer.flush().await?;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Session logger lagged, skipped {skipped} samples");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
        Ok(())
    }

    fn log_summary(&self) {
        let heart_rate = self
            .summary
            .average_heart_rate()
            .map_or_else(|| "--".to_string(), |bpm| format!("{bpm} bpm"));
        let power = self
            .summary
            .average_power()
            .map_or_else(|| "--".to_string(), |watts| format!("{watts:.1} W"));
        info!(
            "Session saved to {}: {} samples, avg heart rate {}, avg power {}",
            self.path.display(),
            self.summary.samples(),
            heart_rate,
            power
        );
    }
}

pub async fn session_logging_thread(
    mut broadcast_rx: BReceiver<AppUpdate>,
    misc_settings: MiscSettings,
    cancel_token: CancellationToken,
) {
    if !misc_settings.log_sessions_to_csv {
        info!("Session CSV logging wasn't enabled! Shutting down thread.");
        return;
    }

    let mut logger = match SessionLogger::build(&misc_settings).await {
        Ok(logger) => logger,
        Err(e) => {
            error!("Failed to start session log: {e}");
            return;
        }
    };

    info!("Session logging thread started!");

    if let Err(e) = logger.rx_loop(&mut broadcast_rx, cancel_token).await {
        error!("Session logging error: {e}");
    }
    logger.log_summary();
}
