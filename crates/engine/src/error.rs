use ifthen_queue::QueueError;
use ifthen_rules::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The rule store failed; the current message must be redelivered.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("listener already started")]
    AlreadyStarted,
}
