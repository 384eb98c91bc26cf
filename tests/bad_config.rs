use misfit_metrics::args::TopLevelCmd;
use misfit_metrics::errors::AppError;
use misfit_metrics::settings::Settings;

use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use ntest::timeout;

fn test_config(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("test_configs")
        .join(name)
}

fn assert_config_error(name: &str) {
    match Settings::load(&test_config(name), true) {
        Err(AppError::Config(_)) => {}
        Err(other) => panic!("{name}: expected a config error, got {other}"),
        Ok(settings) => panic!("{name}: loaded {settings:?}"),
    }
}

#[test]
fn misspelled_bool() {
    assert_config_error("misspelled_bool.toml");
}

#[test]
fn missing_end_quote() {
    assert_config_error("missing_end_quote.toml");
}

#[test]
fn unknown_auto_connect_policy() {
    assert_config_error("unknown_policy.toml");
}

#[test]
fn wrong_value_type() {
    assert_config_error("wrong_type.toml");
}

#[tokio::test]
#[timeout(3000)] // 3s timeout
async fn headless_refuses_bad_config() {
    let parent_token = CancellationToken::new();

    let arg_config = TopLevelCmd {
        config_override: Some(test_config("misspelled_bool.toml")),
        config_required: true,
        no_save: true,
        subcommands: None,
    };

    let result = misfit_metrics::run_headless(arg_config, parent_token).await;
    assert!(matches!(result, Err(AppError::Config(_))));
}
