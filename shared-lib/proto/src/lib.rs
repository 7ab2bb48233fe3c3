//! Shared protobuf definitions for the echo service
//!
//! Generated from `proto/echo/v1/echo.proto`. Messages also derive `serde`,
//! so the HTTP gateway can transcode them to and from JSON.

/// `echo.v1` proto definitions
pub mod echo {
    tonic::include_proto!("echo.v1");
}

// Re-export commonly used types for convenience
pub use echo::*;

/// File descriptor set for gRPC reflection
pub const FILE_DESCRIPTOR_SET: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/echo_descriptor.bin"));
