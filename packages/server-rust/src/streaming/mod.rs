//! Token stream consumption and folding.

mod consumer;
mod retry;
mod sink;

pub use consumer::{ConsumerOptions, StreamConsumer};
pub use retry::RetryPolicy;
pub use sink::{ConcatFn, ConcatSink, FoldingSink};
