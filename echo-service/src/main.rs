//! Echo service entry point
//!
//! Serves `echo.v1.EchoService` over gRPC and, through the gateway, over
//! HTTP/JSON until Ctrl+C or SIGTERM.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use server_kit::{Config, Server, ServerState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "echo_service=info,server_kit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    tracing::info!("Starting echo service v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "gRPC port {}, HTTP gateway port {}",
        config.rpc_port,
        config.http_port
    );

    let mut server = Server::from_config(&config);
    echo_service::register(&mut server);

    if let Err(e) = server.run_and_wait().await {
        tracing::error!("{}", e);
        // The gateway failed after the gRPC server came up.
        if server.state() == ServerState::RpcUp {
            server.stop().await?;
        }
        return Err(e.into());
    }

    Ok(())
}
