//! Session state machine
//!
//! Pure transitions over [`Session`]: the runtime decides when to call them
//! and owns all I/O.

pub mod combat;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use combat::StrikeResolver;
pub use state::{Mode, ModeKind, ObservableState, Session, SessionContext};
pub use transition::{apply_narration, plan, PendingChange, Plan};
