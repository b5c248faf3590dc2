//! Domain models for the relay service.

pub mod outcome;
pub mod parameters;
pub mod request;
pub mod session;

pub use outcome::{RelayOutcome, RelayState};
pub use request::{ClientRequest, Message, RenderedPrompt, UpstreamRequest};
pub use session::ConnectionSession;
