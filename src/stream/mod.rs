//! Live event-stream client for storyboard generation runs.

pub mod error;
pub mod event_stream;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod transport;
pub mod view;
pub mod websocket;

#[cfg(test)]
mod fake;

pub use error::StreamError;
pub use protocol::{Command, Event, EventKind, SystemSignal};
pub use reconnect::{LinkState, ReconnectPolicy};
pub use session::{SessionUpdate, StreamSession};
pub use transport::{ChannelKind, StreamTransport, Transport};
pub use view::{DerivedView, FinalOutput, Plan, Scene, SessionStatus};
