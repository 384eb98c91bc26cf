use misfit_metrics::args::{DummyCmd, SubCommands, TopLevelCmd};

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use ntest::timeout;

#[tokio::test]
#[timeout(8000)] // 8s timeout
async fn dummy_ride_writes_session_csv() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = dir.path().join("sessions");
    let config = dir.path().join("misfit.toml");
    std::fs::write(
        &config,
        format!(
            "[ble]\nsaved_devices_path = '{}'\n\n[misc]\nreport_interval_ms = 200\nlog_sessions_to_csv = true\nlog_sessions_csv_path = '{}'\n\n[dummy]\nloops_before_dc = 0\n",
            dir.path().join("saved_devices.toml").display(),
            sessions.display()
        ),
    )
    .unwrap();

    let parent_token = CancellationToken::new();
    let stopper = parent_token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        stopper.cancel();
    });

    let arg_config = TopLevelCmd {
        config_override: Some(config),
        config_required: true,
        no_save: true,
        subcommands: Some(SubCommands::Dummy(DummyCmd {})),
    };
    misfit_metrics::run_headless(arg_config, parent_token)
        .await
        .unwrap();

    let logs: Vec<_> = std::fs::read_dir(&sessions)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(logs.len(), 1);
    let name = logs[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("session-") && name.ends_with(".csv"));

    let contents = std::fs::read_to_string(&logs[0]).unwrap();
    let mut lines = contents.lines();
    assert_eq!(
        lines.next(),
        Some("Timestamp,HeartRate,Power,ThreeSecondPower,Cadence")
    );
    assert!(lines.count() >= 5);
}
