//! HTTP gateway in front of the gRPC server
//!
//! The gateway dials the gRPC server over a plaintext loopback channel and
//! serves an axum [`ServeMux`] whose transcoded routes are contributed by
//! [`GatewayRegistrar`]s.

mod coerce;
pub mod mux;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};

use error::{Result, ServerError};

use crate::supervisor::{ServeTask, TaskStatus};

pub use mux::ServeMux;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Wires one gRPC service's HTTP routes into the gateway mux.
#[async_trait]
pub trait GatewayRegistrar: Send + Sync {
    /// Register routes on `mux` that forward to the gRPC server via `channel`.
    ///
    /// `ctx` is cancelled when the gateway stops; background work tied to
    /// the routes should end with it.
    async fn register_gateway(
        &self,
        ctx: &CancellationToken,
        mux: &mut ServeMux,
        channel: Channel,
    ) -> anyhow::Result<()>;
}

/// HTTP server that transcodes requests to the gRPC server
pub struct GatewayServer {
    mux: ServeMux,
    port: u16,
    rpc_addr: String,
    connect_timeout: Duration,
    channel: Option<Channel>,
    registrars: Vec<Arc<dyn GatewayRegistrar>>,
    context: CancellationToken,
    task: Option<ServeTask>,
    last_status: TaskStatus,
}

impl GatewayServer {
    /// Create a gateway serving on `http_port` and forwarding to `rpc_addr`
    /// (`host:port`).
    pub fn new(http_port: u16, rpc_addr: impl Into<String>) -> Self {
        Self {
            mux: ServeMux::new(),
            port: http_port,
            rpc_addr: rpc_addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel: None,
            registrars: Vec::new(),
            context: CancellationToken::new(),
            task: None,
            last_status: TaskStatus::Idle,
        }
    }

    /// Bound the dial to the gRPC server.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Add a registrar. Must be called before [`GatewayServer::start`].
    ///
    /// A registrar added later is kept but not invoked until the next start.
    pub fn register_service(&mut self, registrar: Arc<dyn GatewayRegistrar>) {
        if self.task.is_some() {
            tracing::warn!("Gateway registrar added after start; its routes are not served");
        }
        self.registrars.push(registrar);
    }

    /// Mux for supplementary HTTP routes.
    pub fn mux_mut(&mut self) -> &mut ServeMux {
        &mut self.mux
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn rpc_addr(&self) -> &str {
        &self.rpc_addr
    }

    /// Channel to the gRPC server while started.
    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    /// Whether the HTTP serve loop has been launched and not stopped.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Status of the HTTP serve loop.
    pub fn serve_status(&self) -> TaskStatus {
        match &self.task {
            Some(task) => task.status(),
            None => self.last_status.clone(),
        }
    }

    /// Status channel of the running serve loop.
    pub fn watch_status(&self) -> Option<watch::Receiver<TaskStatus>> {
        self.task.as_ref().map(ServeTask::subscribe)
    }

    /// Dial the gRPC server, run the registrars and launch the HTTP server.
    ///
    /// Registrars run in registration order and the first failure aborts the
    /// start without invoking the rest. The HTTP listener is bound by the
    /// background task, so a bind failure shows up in
    /// [`GatewayServer::serve_status`] rather than here.
    pub async fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Err(ServerError::AlreadyStarted("gateway"));
        }

        let endpoint = Endpoint::from_shared(format!("http://{}", self.rpc_addr))
            .map_err(|e| ServerError::dial(self.rpc_addr.clone(), e))?
            .connect_timeout(self.connect_timeout);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| ServerError::dial(self.rpc_addr.clone(), e))?;
        self.channel = Some(channel.clone());

        // A failed earlier start may have handed its token to registrars.
        self.context.cancel();
        let context = CancellationToken::new();
        self.context = context.clone();

        // Registrar routes hold clones of the channel; they live in this
        // start's copy of the mux so stopping the server releases them.
        let mut mux = self.mux.clone();
        for (index, registrar) in self.registrars.iter().enumerate() {
            registrar
                .register_gateway(&context, &mut mux, channel.clone())
                .await
                .map_err(|e| ServerError::register(index, e))?;
        }

        let app = mux.router();
        let addr = format!("0.0.0.0:{}", self.port);
        let shutdown = context.clone();

        self.task = Some(ServeTask::spawn("HTTP gateway", context, async move {
            let listener = TcpListener::bind(&addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }));

        tracing::info!("gRPC-Gateway started on port {}", self.port);
        Ok(())
    }

    /// Gracefully shut down the HTTP server, then close the gRPC channel.
    ///
    /// With a deadline, the shutdown is abandoned once it expires and an error
    /// is returned; the channel is closed either way. No-op if never started.
    pub async fn stop(&mut self, deadline: Option<Duration>) -> Result<()> {
        let mut outcome = Ok(());

        if let Some(task) = self.task.take() {
            match task.shutdown(deadline).await {
                Ok(status) => {
                    self.last_status = status;
                    tracing::info!("gRPC-Gateway stopped gracefully");
                }
                Err(e) => {
                    self.last_status = TaskStatus::Failed(e.to_string());
                    outcome = Err(ServerError::Shutdown {
                        server: "HTTP server",
                        reason: format!("graceful shutdown did not finish within {deadline:?}"),
                    });
                }
            }
        }

        self.context.cancel();
        // Closing is best-effort: the connection goes away with its last handle.
        self.channel = None;
        outcome
    }
}
