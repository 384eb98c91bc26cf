use misfit_metrics::args::TopLevelCmd;
use misfit_metrics::errors::AppError;
use misfit_metrics::run_headless;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    human_panic::setup_panic!();

    let arg_config: TopLevelCmd = argh::from_env();

    let cancel_token = CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    run_headless(arg_config, cancel_token).await
}
