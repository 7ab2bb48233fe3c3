//! gRPC server wrapper
//!
//! Owns a `tonic` server, the services registered on it and, once started,
//! the listening socket and its serve loop.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::RoutesBuilder;
use tonic::transport::Server;

use error::{Result, ServerError};

use crate::shutdown::shutdown_signal;
use crate::supervisor::{ServeTask, TaskStatus};

/// gRPC server with reflection and graceful stop
pub struct RpcServer {
    server: Server,
    routes: RoutesBuilder,
    descriptor_sets: Vec<&'static [u8]>,
    port: u16,
    /// Set iff the server is listening
    local_addr: Option<SocketAddr>,
    task: Option<ServeTask>,
    last_status: TaskStatus,
}

impl RpcServer {
    /// Create a server for `port` with default transport settings.
    pub fn new(port: u16) -> Self {
        Self::with_server(port, Server::builder())
    }

    /// Create a server for `port` using a preconfigured transport builder
    /// (timeouts, concurrency limits, keepalive, ...).
    pub fn with_server(port: u16, server: Server) -> Self {
        Self {
            server,
            routes: RoutesBuilder::default(),
            descriptor_sets: Vec::new(),
            port,
            local_addr: None,
            task: None,
            last_status: TaskStatus::Idle,
        }
    }

    /// Service registry. Services must be added before [`RpcServer::start`].
    pub fn routes_mut(&mut self) -> &mut RoutesBuilder {
        &mut self.routes
    }

    /// Expose an encoded `FileDescriptorSet` through the reflection service.
    pub fn register_file_descriptor_set(&mut self, descriptor_set: &'static [u8]) -> &mut Self {
        self.descriptor_sets.push(descriptor_set);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.local_addr.is_some()
    }

    /// Status of the serve loop.
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

    /// Bind the listener and launch the serve loop.
    ///
    /// Returns as soon as the loop is spawned. Errors from the loop itself are
    /// logged and reported through [`RpcServer::serve_status`].
    pub async fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Err(ServerError::AlreadyStarted("gRPC server"));
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Listen {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Listen { addr, source })?;

        let mut routes = self.routes.clone();
        let reflection = self
            .descriptor_sets
            .iter()
            .copied()
            .fold(
                tonic_reflection::server::Builder::configure(),
                |builder, set| builder.register_encoded_file_descriptor_set(set),
            )
            .build_v1();
        match reflection {
            Ok(reflection) => {
                routes.add_service(reflection);
            }
            Err(e) => tracing::warn!("gRPC reflection disabled: {}", e),
        }

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let router = self.server.add_routes(routes.routes());
        let incoming = TcpListenerStream::new(listener);

        self.task = Some(ServeTask::spawn("gRPC server", cancel, async move {
            router
                .serve_with_incoming_shutdown(incoming, shutdown.cancelled_owned())
                .await
        }));
        self.local_addr = Some(local_addr);

        tracing::info!("gRPC server started on port {}", local_addr.port());
        Ok(())
    }

    /// Stop accepting connections and wait for in-flight calls to finish.
    ///
    /// No-op if the server was never started.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.local_addr = None;

        match task.shutdown(None).await {
            Ok(status) => self.last_status = status,
            Err(e) => {
                tracing::error!("gRPC server did not stop: {}", e);
                self.last_status = TaskStatus::Failed(e.to_string());
            }
        }
        tracing::info!("gRPC server stopped gracefully");
    }

    /// Start, wait for Ctrl+C or SIGTERM, then stop.
    pub async fn run_and_wait(&mut self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Start, wait for `signal`, then stop.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        signal.await;
        self.stop().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tonic::transport::Channel;
    use tonic_reflection::pb::v1::server_reflection_client::ServerReflectionClient;
    use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;
    use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;
    use tonic_reflection::pb::v1::ServerReflectionRequest;

    #[tokio::test]
    async fn test_start_on_occupied_port_fails() {
        let occupied = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let mut server = RpcServer::new(port);
        let err = server.start().await.unwrap_err();

        assert!(matches!(err, ServerError::Listen { .. }));
        assert!(!server.is_listening());
        assert_eq!(server.serve_status(), TaskStatus::Idle);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut server = RpcServer::new(0);
        server.stop().await;
        assert!(!server.is_listening());
        assert_eq!(server.serve_status(), TaskStatus::Idle);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let mut server = RpcServer::new(0);
        server.start().await.unwrap();

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::AlreadyStarted(_)));

        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_port() {
        let mut server = RpcServer::new(0);
        server.start().await.unwrap();
        let port = server.local_addr().unwrap().port();
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_ok());

        server.stop().await;

        assert!(!server.is_listening());
        assert_eq!(server.serve_status(), TaskStatus::Stopped);
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_reflection_lists_registered_services() {
        let mut server = RpcServer::new(0);
        server.register_file_descriptor_set(proto::FILE_DESCRIPTOR_SET);
        server.start().await.unwrap();
        let port = server.local_addr().unwrap().port();

        let channel = Channel::from_shared(format!("http://127.0.0.1:{port}"))
            .unwrap()
            .connect()
            .await
            .unwrap();
        let mut client = ServerReflectionClient::new(channel);
        let request = ServerReflectionRequest {
            host: String::new(),
            message_request: Some(MessageRequest::ListServices(String::new())),
        };
        let mut responses = client
            .server_reflection_info(tokio_stream::iter(vec![request]))
            .await
            .unwrap()
            .into_inner();
        let response = responses.message().await.unwrap().unwrap();

        let Some(MessageResponse::ListServicesResponse(list)) = response.message_response else {
            panic!("unexpected reflection response");
        };
        let names: Vec<_> = list.service.into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"echo.v1.EchoService".to_string()));

        drop(responses);
        drop(client);
        tokio::time::timeout(Duration::from_secs(5), server.stop())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_until_stops_on_signal() {
        let mut server = RpcServer::new(0);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), server.run_until(cancel.cancelled_owned()))
            .await
            .unwrap()
            .unwrap();
        assert!(!server.is_listening());
    }
}
