//! Echo gRPC service implementation

use tonic::{Request, Response, Status};

use proto::echo_service_server::EchoService;
use proto::{EchoRequest, EchoResponse};

/// Echo service implementation
#[derive(Debug, Default, Clone)]
pub struct EchoServiceImpl;

impl EchoServiceImpl {
    pub fn new() -> Self {
        Self
    }
}

#[tonic::async_trait]
impl EchoService for EchoServiceImpl {
    async fn echo(&self, request: Request<EchoRequest>) -> Result<Response<EchoResponse>, Status> {
        let req = request.into_inner();
        if req.message.is_empty() {
            return Err(Status::invalid_argument("message must not be empty"));
        }

        tracing::debug!("Echo: {}", req.message);
        let response = EchoResponse {
            length: req.message.chars().count() as u32,
            message: req.message,
        };
        Ok(Response::new(response))
    }
}
