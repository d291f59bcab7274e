//! The orchestration core (spec §3-§4): plan/task model, DAG planner,
//! pub/sub event bus, in-memory job registry, and the scheduler that drives
//! tasks through stage handlers.
pub mod events;
pub mod model;
pub mod planner;
pub mod registry;
pub mod scheduler;
