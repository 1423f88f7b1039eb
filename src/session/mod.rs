//! Recording session state machine
//!
//! A session drives one capture from start to finalized file:
//! - resolves the Bluetooth device to an audio source
//! - runs the external encoder into scratch storage
//! - publishes `Recording` / progress / `Converting` / terminal status
//! - runs the level monitor alongside the capture
//! - stops the encoder gracefully and moves the result to durable storage

mod config;
mod error;
mod session;

pub use config::SessionConfig;
pub use error::{SessionError, SessionOutcome};
pub use session::{RecordingSession, SessionBackends, StartRequest};
