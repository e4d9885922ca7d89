pub mod consumer;
pub mod error;
pub mod memory;
pub mod parser;
pub mod sqs;

pub use consumer::{QueueConsumer, QueueHealth, QueueMessage};
pub use error::QueueError;
pub use memory::MemoryQueue;
pub use parser::parse_message;
pub use sqs::SqsConsumer;
