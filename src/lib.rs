//! An in-process HTTP stub server for simulating downstream HTTP dependencies
//! in tests.
//!
//! Register an ordered, replay-once sequence of canned responses per
//! method+path with [`StubServer::add_interaction`] (or directly on
//! [`Interactions`]); each incoming request consumes the next response in its
//! sequence, and requests with nothing left to consume get a clearly-labeled
//! 501 error.

mod configuration;
mod error;
mod interactions;
mod stub_server;

pub use configuration::{resolve, ServerConfig, StubConfig, StubOption};
pub use error::Error;
pub use interactions::{
    CapturedRequest, ContentType, InteractionData, Interactions, RequestCaptureFn,
};
pub use stub_server::StubServer;
