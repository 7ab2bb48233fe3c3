//! HTTP routes for the echo service

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use proto::echo_service_client::EchoServiceClient;
use proto::EchoRequest;
use server_kit::gateway::mux::MethodFilter;
use server_kit::{GatewayRegistrar, ServeMux};

/// Exposes `echo.v1.EchoService/Echo` as
///
/// - `POST /v1/echo` with a JSON body `{"message": "..."}`
/// - `GET /v1/echo/:message`
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoGatewayRegistrar;

#[async_trait]
impl GatewayRegistrar for EchoGatewayRegistrar {
    async fn register_gateway(
        &self,
        _ctx: &CancellationToken,
        mux: &mut ServeMux,
        channel: Channel,
    ) -> anyhow::Result<()> {
        let client = EchoServiceClient::new(channel);
        let echo = move |request: EchoRequest| {
            let mut client = client.clone();
            async move { client.echo(request).await }
        };

        mux.handle_unary(MethodFilter::POST, "/v1/echo", echo.clone())
            .handle_unary(MethodFilter::GET, "/v1/echo/:message", echo);
        Ok(())
    }
}
