//! HTTP request multiplexer with gRPC transcoding
//!
//! Registrars add unary routes that decode an HTTP request into a protobuf
//! message, call the gRPC backend and encode the reply as JSON.
//!
//! Request fields are collected from three sources, later ones overwriting
//! earlier ones:
//!
//! 1. the JSON body (an empty body counts as `{}`)
//! 2. query parameters
//! 3. path parameters (`/v1/items/:id`)
//!
//! Parameter values are text; they fill number and bool fields when they
//! parse as one.

use std::collections::HashMap;
use std::future::Future;

use axum::extract::{Path, Query};
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodRouter};
use axum::{Json, Router};
use bytes::Bytes;
use http::{StatusCode, Uri};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tonic::{Code, Status};

use error::ErrorResponse;

use super::coerce::Coerced;

pub use axum::routing::MethodFilter;

/// Route table for the gateway's HTTP server
#[derive(Clone, Default)]
pub struct ServeMux {
    router: Router,
}

impl ServeMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain axum route, e.g. a health check next to the transcoded API.
    pub fn handle(&mut self, path: &str, method_router: MethodRouter) -> &mut Self {
        self.router = std::mem::take(&mut self.router).route(path, method_router);
        self
    }

    /// Add a transcoded unary route.
    ///
    /// `call` receives the decoded request and usually forwards it through a
    /// generated gRPC client.
    pub fn handle_unary<Req, Resp, F, Fut>(
        &mut self,
        method: MethodFilter,
        path: &str,
        call: F,
    ) -> &mut Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<tonic::Response<Resp>, Status>> + Send + 'static,
    {
        let handler = move |params: Option<Path<HashMap<String, String>>>,
                            uri: Uri,
                            body: Bytes| {
            let call = call.clone();
            async move {
                let path_params = params.map(|Path(p)| p).unwrap_or_default();
                let request = match decode_request::<Req>(path_params, &uri, &body) {
                    Ok(request) => request,
                    Err(rejection) => return rejection,
                };

                match call(request).await {
                    Ok(response) => Json(response.into_inner()).into_response(),
                    Err(status) => status_response(&status),
                }
            }
        };

        self.handle(path, on(method, handler))
    }

    /// Build the axum router, with a JSON 404 for unmatched paths.
    pub fn router(&self) -> Router {
        self.router.clone().fallback(not_found)
    }
}

fn decode_request<T: DeserializeOwned>(
    path_params: HashMap<String, String>,
    uri: &Uri,
    body: &[u8],
) -> Result<T, Response> {
    let mut fields = if body.iter().all(u8::is_ascii_whitespace) {
        Map::new()
    } else {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => return Err(invalid_argument("request body must be a JSON object")),
            Err(e) => return Err(invalid_argument(format!("invalid JSON body: {e}"))),
        }
    };

    if uri.query().is_some() {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map_err(|e| invalid_argument(format!("invalid query string: {e}")))?;
        for (key, value) in pairs {
            fields.insert(key, Value::String(value));
        }
    }

    for (key, value) in path_params {
        fields.insert(key, Value::String(value));
    }

    T::deserialize(Coerced(Value::Object(fields)))
        .map_err(|e| invalid_argument(format!("invalid request: {e}")))
}

fn invalid_argument(message: impl Into<String>) -> Response {
    status_response(&Status::invalid_argument(message))
}

async fn not_found(uri: Uri) -> Response {
    status_response(&Status::not_found(format!("no route for {}", uri.path())))
}

/// Render a gRPC status as an HTTP error response.
pub fn status_response(status: &Status) -> Response {
    let body = ErrorResponse::new(status.code() as i32, status.message());
    (http_status(status.code()), Json(body)).into_response()
}

/// HTTP status for a gRPC code.
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        // Client closed request
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::BAD_REQUEST,
        Code::Aborted => StatusCode::CONFLICT,
        Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
    }
}
