pub mod config;
pub mod error;
pub mod relay;

pub use config::Settings;
pub use error::{BindError, DeliveryError, RelayError};
pub use relay::{Relay, RelayServer};

pub type Result<T> = std::result::Result<T, RelayError>;

/// Binds the relay described by `settings` and serves until Ctrl-C.
pub async fn serve(settings: &Settings) -> Result<()> {
    let server = RelayServer::start(&settings.server.host, settings.server.port).await?;
    let addr = server.local_addr()?;
    tracing::info!("relay listening on {}", addr);

    server.run_until_ctrl_c().await;
    Ok(())
}
