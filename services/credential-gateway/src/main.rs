use std::net::SocketAddr;
use std::sync::Arc;

use common_config::{load, load_env_file};
use common_obs::{ObsInit, ObsSettings};
use credential_gateway::config::GatewayConfig;
use credential_gateway::service::CredentialValidationService;
use credential_gateway::{build_router, AppState, SERVICE_NAME};
use tokio::net::TcpListener;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_file = load_env_file();
    let config = match load::<GatewayConfig>() {
        Ok(config) => config,
        Err(error) => {
            // Logging has not been configured yet; report through the defaults.
            if ObsInit::init(SERVICE_NAME, &ObsSettings::default()).is_ok() {
                env_file.log();
                tracing::error!(event = "config_invalid", %error, "refusing to start");
            }
            return Err(error.into());
        }
    };

    ObsInit::init(SERVICE_NAME, &config.obs_settings())?;
    env_file.log();

    let service = CredentialValidationService::from_config(&config)?;
    let state = Arc::new(AppState { service });
    let router = build_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    tracing::info!(
        event = "service_start",
        service = SERVICE_NAME,
        version = VERSION,
        listen_addr = %config.listen_addr,
        authority = %config.authority,
        resource_url = %config.resource_url,
        timeout_secs = config.timeout.as_secs(),
        debug = config.debug,
        "starting service"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!(event = "service_stop", service = SERVICE_NAME);

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!(event = "shutdown_requested", "shutting down");
}
