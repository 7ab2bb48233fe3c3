//! Composite server: one gRPC server plus the HTTP gateway in front of it
//!
//! Start order is gRPC then gateway, because the gateway dials the gRPC
//! listener. Stop order is the reverse, so no HTTP-originated call reaches the
//! gRPC server while it drains.
//!
//! Neither direction compensates for a partial failure:
//!
//! - a gateway start failure leaves the gRPC server running ([`ServerState::RpcUp`]);
//!   call [`Server::stop`] to release it.
//! - a gateway stop failure returns before the gRPC server is stopped
//!   ([`ServerState::GatewayDraining`]); calling [`Server::stop`] again retries.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;

use error::{Result, ServerError};

use crate::config::Config;
use crate::gateway::GatewayServer;
use crate::rpc::RpcServer;
use crate::shutdown::shutdown_signal;

/// Lifecycle state of the composite server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Nothing started.
    Idle,
    /// gRPC server listening, gateway not serving.
    RpcUp,
    /// Both servers serving.
    BothUp,
    /// Gateway shutdown in progress or failed.
    GatewayDraining,
    /// Both servers stopped.
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Idle => "idle",
            ServerState::RpcUp => "rpc-up",
            ServerState::BothUp => "both-up",
            ServerState::GatewayDraining => "gateway-draining",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// gRPC server and HTTP gateway run as one unit
pub struct Server {
    rpc: RpcServer,
    gateway: GatewayServer,
    shutdown_timeout: Option<Duration>,
    state: ServerState,
    transitions: broadcast::Sender<ServerState>,
}

impl Server {
    /// Create a server pair; the gateway dials `localhost:<rpc_port>`.
    pub fn new(rpc_port: u16, http_port: u16) -> Self {
        Self::from_config(&Config {
            rpc_port,
            http_port,
            ..Config::default()
        })
    }

    pub fn from_config(config: &Config) -> Self {
        let (transitions, _) = broadcast::channel(16);
        Self {
            rpc: RpcServer::new(config.rpc_port),
            gateway: GatewayServer::new(config.http_port, config.rpc_dial_addr())
                .with_connect_timeout(config.connect_timeout()),
            shutdown_timeout: config.shutdown_timeout(),
            state: ServerState::Idle,
            transitions,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Receive every state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerState> {
        self.transitions.subscribe()
    }

    pub fn rpc(&self) -> &RpcServer {
        &self.rpc
    }

    /// gRPC server, for registering services before start.
    pub fn rpc_mut(&mut self) -> &mut RpcServer {
        &mut self.rpc
    }

    pub fn gateway(&self) -> &GatewayServer {
        &self.gateway
    }

    /// Gateway, for adding registrars and routes before start.
    pub fn gateway_mut(&mut self) -> &mut GatewayServer {
        &mut self.gateway
    }

    fn transition(&mut self, next: ServerState) {
        tracing::debug!("Server state {} -> {}", self.state, next);
        self.state = next;
        // No subscribers is fine.
        let _ = self.transitions.send(next);
    }

    /// Start the gRPC server, then the gateway.
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            ServerState::Idle | ServerState::Stopped => {}
            state => {
                return Err(ServerError::InvalidState {
                    op: "start",
                    state: state.to_string(),
                })
            }
        }

        self.rpc
            .start()
            .await
            .map_err(|e| ServerError::StartRpc(Box::new(e)))?;
        self.transition(ServerState::RpcUp);

        self.gateway
            .start()
            .await
            .map_err(|e| ServerError::StartGateway(Box::new(e)))?;
        self.transition(ServerState::BothUp);

        Ok(())
    }

    /// Stop the gateway, then the gRPC server.
    pub async fn stop(&mut self) -> Result<()> {
        if matches!(self.state, ServerState::Idle | ServerState::Stopped) {
            return Ok(());
        }

        if matches!(self.state, ServerState::BothUp | ServerState::GatewayDraining) {
            self.transition(ServerState::GatewayDraining);
        }
        self.gateway
            .stop(self.shutdown_timeout)
            .await
            .map_err(|e| ServerError::StopGateway(Box::new(e)))?;
        if self.state != ServerState::RpcUp {
            self.transition(ServerState::RpcUp);
        }

        self.rpc.stop().await;
        self.transition(ServerState::Stopped);
        Ok(())
    }

    /// Start, wait for Ctrl+C or SIGTERM, then stop.
    pub async fn run_and_wait(&mut self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Start, wait for `signal`, then stop.
    ///
    /// A start failure is returned as is; a gRPC server started before the
    /// failure keeps running.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        signal.await;
        tracing::info!("Shutting down");
        self.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayRegistrar, ServeMux};
    use async_trait::async_trait;
    use axum::routing::get;
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::sync::CancellationToken;
    use tonic::transport::Channel;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("0.0.0.0:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    struct Refusing;

    #[async_trait]
    impl GatewayRegistrar for Refusing {
        async fn register_gateway(
            &self,
            _ctx: &CancellationToken,
            _mux: &mut ServeMux,
            _channel: Channel,
        ) -> anyhow::Result<()> {
            anyhow::bail!("refused")
        }
    }

    /// Serves `/hang`, a route whose handler never completes.
    struct Hanging;

    #[async_trait]
    impl GatewayRegistrar for Hanging {
        async fn register_gateway(
            &self,
            _ctx: &CancellationToken,
            mux: &mut ServeMux,
            _channel: Channel,
        ) -> anyhow::Result<()> {
            mux.handle(
                "/hang",
                get(|| async { std::future::pending::<&'static str>().await }),
            );
            Ok(())
        }
    }

    async fn refuses(port: u16) -> bool {
        TcpStream::connect(("127.0.0.1", port)).await.is_err()
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let mut server = Server::new(free_port(), free_port());
        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::Idle);
    }

    #[tokio::test]
    async fn test_gateway_stops_before_rpc() {
        let (rpc_port, http_port) = (free_port(), free_port());
        let mut server = Server::new(rpc_port, http_port);
        let mut transitions = server.subscribe();

        server.start().await.unwrap();
        assert_eq!(server.state(), ServerState::BothUp);
        server.stop().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(state) = transitions.try_recv() {
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                ServerState::RpcUp,
                ServerState::BothUp,
                ServerState::GatewayDraining,
                ServerState::RpcUp,
                ServerState::Stopped,
            ]
        );
        assert!(refuses(rpc_port).await);
        assert!(refuses(http_port).await);
    }

    #[tokio::test]
    async fn test_rpc_failure_skips_gateway() {
        let occupied = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let rpc_port = occupied.local_addr().unwrap().port();
        let mut server = Server::new(rpc_port, free_port());

        let err = server.start().await.unwrap_err();

        assert!(matches!(err, ServerError::StartRpc(_)));
        assert!(matches!(err.root(), ServerError::Listen { .. }));
        assert_eq!(server.state(), ServerState::Idle);
        assert!(!server.gateway().is_running());
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_rpc_running() {
        let rpc_port = free_port();
        let mut server = Server::new(rpc_port, free_port());
        server.gateway_mut().register_service(Arc::new(Refusing));

        let err = server.start().await.unwrap_err();

        assert!(matches!(err, ServerError::StartGateway(_)));
        assert_eq!(server.state(), ServerState::RpcUp);
        assert!(server.rpc().is_listening());
        assert!(!refuses(rpc_port).await);

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(refuses(rpc_port).await);
    }

    #[tokio::test]
    async fn test_gateway_stop_timeout_keeps_rpc_running_until_retry() {
        let (rpc_port, http_port) = (free_port(), free_port());
        let mut server = Server::from_config(&Config {
            rpc_port,
            http_port,
            shutdown_timeout_secs: Some(1),
            ..Config::default()
        });
        server.gateway_mut().register_service(Arc::new(Hanging));
        server.start().await.unwrap();

        for _ in 0..100 {
            if !refuses(http_port).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let in_flight = tokio::spawn(async move {
            let _ = reqwest::get(format!("http://127.0.0.1:{http_port}/hang")).await;
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = server.stop().await.unwrap_err();

        assert!(matches!(err, ServerError::StopGateway(_)));
        assert!(matches!(err.root(), ServerError::Shutdown { .. }));
        assert_eq!(server.state(), ServerState::GatewayDraining);
        assert!(server.rpc().is_listening());
        assert!(!refuses(rpc_port).await);

        server.stop().await.unwrap();

        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!server.rpc().is_listening());
        assert!(refuses(rpc_port).await);
        in_flight.abort();
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected() {
        let mut server = Server::new(free_port(), free_port());
        server.start().await.unwrap();

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidState { op: "start", .. }));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_until_returns_after_signal() {
        let (rpc_port, http_port) = (free_port(), free_port());
        let mut server = Server::new(rpc_port, http_port);
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        tokio::time::timeout(
            Duration::from_secs(10),
            server.run_until(shutdown.cancelled_owned()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(server.state(), ServerState::Stopped);
        assert!(refuses(rpc_port).await);
        assert!(refuses(http_port).await);
    }
}
