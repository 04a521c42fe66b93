use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::{Json, Router};
use docintake_core::{schema_id, Envelope, SchemaDirection, Transport, Verb};
use serde_json::Value;

use crate::network::AppState;
use crate::service::bridge::SpanAttributes;
use crate::service::error::{ConfigError, OperationError};
use crate::service::operation::{Operation, Payload};
use crate::service::schema::{envelope_document, SchemaRegistry};

pub(super) fn mount(
    name: &Arc<str>,
    url: &str,
    operations: Vec<Operation>,
    router: Router<AppState>,
    schemas: &SchemaRegistry,
) -> Result<Router<AppState>, ConfigError> {
    let mut methods: Option<MethodRouter<AppState>> = None;

    for operation in operations {
        let verb = operation.verb();
        register_schemas(name, &operation, schemas)?;

        let filter = method_filter(verb).ok_or_else(|| ConfigError::VerbTransportMismatch {
            controller: name.to_string(),
            verb,
        })?;

        let operation = Arc::new(operation);
        let name = Arc::clone(name);
        let handler = move |State(state): State<AppState>, uri: Uri, headers: HeaderMap, body: Bytes| {
            let operation = Arc::clone(&operation);
            let name = Arc::clone(&name);
            async move { serve(state, &name, &operation, &uri, headers, &body).await }
        };

        methods = Some(match methods {
            Some(existing) => existing.on(filter, handler),
            None => on(filter, handler),
        });
    }

    Ok(match methods {
        Some(methods) => router.route(url, methods),
        None => router,
    })
}

fn method_filter(verb: Verb) -> Option<MethodFilter> {
    match verb {
        Verb::Get => Some(MethodFilter::GET),
        Verb::Post => Some(MethodFilter::POST),
        Verb::Put => Some(MethodFilter::PUT),
        Verb::Patch => Some(MethodFilter::PATCH),
        Verb::Delete => Some(MethodFilter::DELETE),
        Verb::Message => None,
    }
}

fn register_schemas(
    name: &str,
    operation: &Operation,
    schemas: &SchemaRegistry,
) -> Result<(), ConfigError> {
    let verb = operation.verb();
    if let Some(document) = operation.request_schema() {
        schemas.register(&schema_id(name, verb, SchemaDirection::Request), document)?;
    }
    if let Some(document) = operation.response_schema() {
        schemas.register(
            &schema_id(name, verb, SchemaDirection::Response),
            envelope_document(document),
        )?;
    }
    Ok(())
}

async fn serve(
    state: AppState,
    name: &str,
    operation: &Operation,
    uri: &Uri,
    headers: HeaderMap,
    body: &Bytes,
) -> Response {
    let value: Value = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(err) => {
                return reject(&OperationError::InvalidRequest {
                    cause: err.to_string(),
                })
            }
        }
    };

    let attrs = SpanAttributes {
        name: name.to_string(),
        transport: Transport::Http,
        method: operation.verb(),
        target: uri.path().to_string(),
        body: (!value.is_null()).then(|| value.to_string()),
        quantity: None,
    };

    let call = match operation.bind_http(Payload::http(value, headers)) {
        Ok(call) => call,
        Err(err) => return reject(&err),
    };

    let _in_flight = state.shutdown.in_flight_guard();
    let envelope = match state.bridge.execute(attrs, call).await {
        Ok(data) => Envelope::success(data),
        Err(err) => Envelope::failure(err.message(), err.code()),
    };
    (StatusCode::OK, Json(envelope)).into_response()
}

/// 400 with an error envelope: the body never reached the handler.
fn reject(err: &OperationError) -> Response {
    let envelope: Envelope<Value> = Envelope::failure(err.message(), err.code());
    (StatusCode::BAD_REQUEST, Json(envelope)).into_response()
}
