use flexi_logger::Logger;
use log::{error, info};

use portfolio::settings::Settings;
use portfolio::{AppState, build_router};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!("{}", err);
        eprintln!("portfolio: {err}");
        std::process::exit(1);
    }
}

async fn run() -> portfolio::Result<()> {
    let settings = Settings::from_env()?;
    let _logger = Logger::try_with_env_or_str(settings.log_level())?.start()?;
    info!("Starting with {} profile", settings.profile);

    let state = AppState::new(settings.clone());
    state.templates.preload()?;
    let _watcher = if settings.template.debug {
        Some(state.templates.watch()?)
    } else {
        None
    };

    build_router(state).run(&settings).await
}
