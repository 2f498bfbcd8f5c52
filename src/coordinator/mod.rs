//! Update coordination.
//!
//! `machine` holds the pure lifecycle state machine; `controller` owns one
//! session inside a tokio task and performs the effects it asks for (service
//! calls, dialogs, timers, host commands).

mod controller;
mod machine;

#[cfg(test)]
pub(crate) use controller::CoordinatorMsg;
pub use controller::{spawn_coordinator, CoordinatorHandle, CoordinatorParts};
pub use machine::{SessionConfig, UpdateSession, UpdateStatus};
#[cfg(test)]
pub(crate) use machine::Input;
