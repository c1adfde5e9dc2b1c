//! The rig runtime: shared state, the supervisor, and archive assembly.

pub mod archive;
pub mod state;
pub mod supervisor;

pub use state::{RigPhase, RigState};
pub use supervisor::{Rig, RigOutcome};
