//! Lifecycle glue for a gRPC server and the HTTP gateway in front of it
//!
//! [`Server`] starts a `tonic` gRPC server and an axum gateway that
//! transcodes HTTP/JSON calls into gRPC, and stops both on Ctrl+C or SIGTERM.
//! Services are registered on [`RpcServer::routes_mut`]; their HTTP routes
//! are wired in by [`GatewayRegistrar`]s.

pub mod config;
pub mod gateway;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod supervisor;

pub use config::{get_config, Config};
pub use error::{ErrorResponse, ServerError};
pub use gateway::{GatewayRegistrar, GatewayServer, ServeMux};
pub use rpc::RpcServer;
pub use server::{Server, ServerState};
pub use shutdown::shutdown_signal;
pub use supervisor::TaskStatus;
