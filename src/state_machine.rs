//! Training-session state machine
//!
//! Pure transitions in the Elm style: `(state, event) -> (state, effects)`.
//! The controller executes the effects; nothing in here performs I/O.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::Event;
pub use state::{SessionContext, SessionState};
pub use transition::{transition, TransitionError, TransitionResult};
