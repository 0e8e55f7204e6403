pub mod controller;
pub mod state;

pub use controller::{CompletionCallback, SessionController, DEFAULT_PHASE_TICK};
pub use state::{PhaseClock, SessionOutcome, SessionSnapshot, SessionState};
