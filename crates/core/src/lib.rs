pub mod config;
pub mod error;
pub mod event;
pub mod rule;
pub mod trigger;

pub use config::Config;
pub use error::*;
pub use event::*;
pub use rule::*;
pub use trigger::*;
