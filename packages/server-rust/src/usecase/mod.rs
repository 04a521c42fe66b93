//! Use cases and the controllers that expose them.

pub mod legal_advice;

pub use legal_advice::{
    extract_controller, extract_operation, invoke_template, stream_controller, stream_operation,
    ContextRequirement, ExtractLegalAdvice, ExtractLegalAdviceRequest, ExtractLegalAdviceResponse,
    LegalAdvice, SourceFile,
};
