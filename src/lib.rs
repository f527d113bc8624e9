//! Prospect trainer - client side of a real-time sales-training session
//!
//! A trainee converses with a simulated prospect over a persistent channel.
//! The crate owns the connection lifecycle, the session store, and the
//! termination and redirect flow; rendering is left to the caller.

#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod config;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod state_machine;
pub mod store;
pub mod termination;
pub mod transport;

pub use config::SessionConfig;
pub use controller::{Notification, SessionController, SessionHandle};
pub use error::SessionError;
