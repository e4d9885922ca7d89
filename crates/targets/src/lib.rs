//! Target agents: where matched rules send their actions.
//!
//! This crate provides:
//! - `TargetAgent` capability trait (`process`, `validate`, metadata descriptor)
//! - `TargetRegistry` keyed by action type
//! - `Dispatcher` fanning a trigger out to its targets under a per-call timeout
//! - Webhook and log target agent implementations
//! - Minijinja rendering of action params against the dispatch context

pub mod dispatcher;
pub mod log;
pub mod registry;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use dispatcher::{DispatchResult, DispatchStatus, Dispatcher};
pub use log::LogTarget;
pub use registry::TargetRegistry;
pub use templating::TemplateRenderer;
pub use traits::{
    target_env_var, AgentMetadata, DispatchContext, SettingDescriptor, TargetAgent, TargetError,
    TARGET_ENV_PREFIX,
};
pub use webhook::WebhookTarget;
