//! Domain side: the transition-oracle contract, concrete domains and the
//! experiment driver.

pub mod experiment;
pub mod rooms;
pub mod simulator;
pub mod test_sim;

pub use rooms::{Rooms, RoomsState};
pub use simulator::{PlanningError, Simulator, SimulatorFlags, StepOutcome};
pub use test_sim::TestSimulator;
