//! Agent side: state machine, control-plane client, and the run loop
//! that turns broker messages into lease/execute/complete cycles.

pub mod client;
pub mod runner;
pub mod state;
pub mod upgrade;

pub use client::{ControlPlaneClient, LeaseResponse};
pub use runner::Agent;
pub use state::{AgentState, StateMachine};
