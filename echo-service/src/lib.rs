//! Echo service
//!
//! A gRPC service and the gateway registrar that exposes it over HTTP/JSON.

pub mod gateway;
pub mod service;

pub use gateway::EchoGatewayRegistrar;
pub use service::EchoServiceImpl;

use proto::echo_service_server::EchoServiceServer;
use server_kit::Server;
use std::sync::Arc;

/// Register the echo service and its HTTP routes on `server`.
pub fn register(server: &mut Server) {
    server
        .rpc_mut()
        .register_file_descriptor_set(proto::FILE_DESCRIPTOR_SET)
        .routes_mut()
        .add_service(EchoServiceServer::new(EchoServiceImpl::new()));
    server
        .gateway_mut()
        .register_service(Arc::new(EchoGatewayRegistrar));
}
