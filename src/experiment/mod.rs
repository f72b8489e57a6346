pub mod blinding;
pub mod session;
pub mod state;

pub use blinding::{Blinding, Condition};
pub use session::{Session, SessionRecord};
pub use state::{CriterionPolicy, ExperimentState, ExperimentStateMachine};
