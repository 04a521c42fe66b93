//! Legal-advice extraction: prompt the model with the submitted context and
//! fold its streamed completion into a [`LegalAdvice`].

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use docintake_core::{ErrorCode, PromptMessage, StreamToken, Verb};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};
use utoipa::ToSchema;

use crate::llm::ModelClient;
use crate::service::{
    ConfigError, Controller, DependencyGraph, InboundMessage, Operation, OperationError, Payload,
    SinkCallback,
};
use crate::streaming::ConcatSink;

pub const EXTRACT_CONTROLLER: &str = "extract_legal_advice";
pub const EXTRACT_URL: &str = "/api/v1/legal-advice";
pub const STREAM_CONTROLLER: &str = "stream_legal_advice";
pub const STREAM_URL: &str = "/api/v1/legal-advice/stream";

const SYSTEM_PROMPT: &str = "You are a legal advisor. Identify the laws and regulations that govern \
the situation described by the user and explain briefly how each one applies.";

/// A document already run through text extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub extracted_text: String,
    pub reflection: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExtractLegalAdviceRequest {
    /// Extracted documents keyed by file name.
    #[serde(default)]
    pub files: BTreeMap<String, SourceFile>,
    /// Free-text description of the situation to advise on.
    pub context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContextRequirement {
    pub valid: bool,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LegalAdvice {
    pub country: String,
    /// Laws and regulations that apply, as written by the model.
    pub regulated_by_law: String,
    pub description: String,
    pub context_requirements: BTreeMap<String, ContextRequirement>,
}

impl LegalAdvice {
    fn from_completion(completion: StreamToken) -> Self {
        Self {
            regulated_by_law: completion.content,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExtractLegalAdviceResponse {
    pub advice: LegalAdvice,
}

/// Renders the chat prompt for `request`.
///
/// # Errors
///
/// `UNABLE_TO_INVOKE_TEMPLATE` when the context is blank.
pub fn invoke_template(request: &ExtractLegalAdviceRequest) -> Result<Vec<PromptMessage>, OperationError> {
    let context = request.context.trim();
    if context.is_empty() {
        return Err(OperationError::tagged(
            ErrorCode::UnableToInvokeTemplate,
            "template variable `advice` is empty",
        ));
    }

    let mut user = format!("Situation:\n{context}\n");
    for (name, file) in &request.files {
        write!(
            user,
            "\nDocument `{name}`:\n{}\nReviewer notes: {}\n",
            file.extracted_text, file.reflection
        )
        .map_err(|err| OperationError::tagged(ErrorCode::UnableToInvokeTemplate, err.to_string()))?;
    }

    Ok(vec![PromptMessage::system(SYSTEM_PROMPT), PromptMessage::user(user)])
}

/// The extraction use case, resolved from the dependency graph.
#[derive(Debug, Clone)]
pub struct ExtractLegalAdvice {
    model: Arc<ModelClient>,
}

impl ExtractLegalAdvice {
    #[must_use]
    pub fn new(model: Arc<ModelClient>) -> Self {
        Self { model }
    }

    /// Runs the extraction to completion.
    ///
    /// # Errors
    ///
    /// Template, stream creation and stream consumption failures, each with
    /// its own error code.
    pub async fn run(
        &self,
        request: &ExtractLegalAdviceRequest,
        cancel: CancellationToken,
    ) -> Result<LegalAdvice, OperationError> {
        let prompt = invoke_template(request)?;
        let sink = ConcatSink::concat();
        let mut consumer = self
            .model
            .open(&prompt, cancel)
            .instrument(info_span!("stream_instantiation"))
            .await?;

        let completion = sink
            .drain(&mut consumer)
            .instrument(info_span!("stream_consumption"))
            .await?;
        Ok(LegalAdvice::from_completion(completion))
    }

    /// Like [`run`](Self::run), forwarding every token to `sink` as it arrives.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run), plus delivery failures of `sink`.
    pub async fn stream(
        &self,
        request: &ExtractLegalAdviceRequest,
        sink: &SinkCallback,
        cancel: CancellationToken,
    ) -> Result<LegalAdvice, OperationError> {
        let prompt = invoke_template(request)?;
        let fold = ConcatSink::concat();
        let mut consumer = self
            .model
            .open(&prompt, cancel)
            .instrument(info_span!("stream_instantiation"))
            .await?;

        let completion = fold
            .drain_with(&mut consumer, |token: StreamToken| async move { sink.send(&token).await })
            .instrument(info_span!("stream_consumption"))
            .await?;
        Ok(LegalAdvice::from_completion(completion))
    }
}

/// Runs [`ExtractLegalAdvice::run`] for one decoded HTTP body.
#[must_use]
pub fn extract_operation() -> Operation {
    Operation::http(
        Verb::Post,
        |graph: Arc<DependencyGraph>, payload: Payload<ExtractLegalAdviceRequest>| async move {
            let usecase = graph.resolve::<ExtractLegalAdvice>()?;
            let advice = usecase.run(&payload.body, payload.cancellation.clone()).await?;
            Ok::<_, OperationError>(ExtractLegalAdviceResponse { advice })
        },
    )
    .with_request_schema::<ExtractLegalAdviceRequest>()
    .with_response_schema::<ExtractLegalAdviceResponse>()
}

/// Decodes one request frame and streams the advice through the socket sink.
#[must_use]
pub fn stream_operation() -> Operation {
    Operation::message(
        |graph: Arc<DependencyGraph>, payload: Payload<InboundMessage>, sink: SinkCallback| async move {
            let request: ExtractLegalAdviceRequest = payload.body.json()?;
            let usecase = graph.resolve::<ExtractLegalAdvice>()?;
            let advice = usecase
                .stream(&request, &sink, payload.cancellation.clone())
                .await?;
            Ok::<_, OperationError>(ExtractLegalAdviceResponse { advice })
        },
    )
}

/// `POST /api/v1/legal-advice`.
///
/// # Errors
///
/// Only if the controller's verb pool is misconfigured.
pub fn extract_controller() -> Result<Controller, ConfigError> {
    Controller::new(EXTRACT_CONTROLLER, EXTRACT_URL).with(extract_operation())
}

/// WebSocket `/api/v1/legal-advice/stream`: one request frame in, one frame
/// per token out.
///
/// # Errors
///
/// Only if the controller's verb pool is misconfigured.
pub fn stream_controller() -> Result<Controller, ConfigError> {
    Controller::new(STREAM_CONTROLLER, STREAM_URL).with(stream_operation())
}
