use dotenv::dotenv;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use ws_relay::{RelayError, Settings};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run() -> ws_relay::Result<()> {
    let config = Settings::new()?;
    info!("Configuration loaded ({} mode)", config.environment);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(ws_relay::serve(&config))?;
    info!("Relay stopped");
    Ok(())
}

fn main() -> ExitCode {
    // Load environment variables
    dotenv().ok();
    init_tracing();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            if let RelayError::Bind(bind) = &e {
                eprintln!("ws-relay: cannot listen on port {}: {}", bind.port(), bind);
            } else {
                eprintln!("ws-relay: {}", e);
            }
            ExitCode::FAILURE
        }
    }
}
