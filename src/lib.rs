pub mod config;
pub mod stream;

pub use config::StreamConfig;
pub use stream::{SessionStatus, SessionUpdate, StreamError, StreamSession};
