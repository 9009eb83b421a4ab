use std::process::ExitCode;
use std::sync::Arc;

use clawmon::browser::ChromiumLauncher;
use clawmon::config::Config;
use clawmon::run::RunController;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("clawmon=info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off")
    });
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = Config::from_env();
    for problem in &config.invalid {
        tracing::warn!(setting = %problem, "Invalid setting");
    }

    let launcher = Arc::new(ChromiumLauncher::new().with_chrome_path(config.chrome_path.clone()));
    let controller = match RunController::new(config, launcher) {
        Ok(controller) => controller,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "Failed to set up the run");
            return ExitCode::FAILURE;
        }
    };

    let outcome = controller.run().await;
    if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
