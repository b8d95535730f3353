//! Plan stage: build a validated, ordered DAG of typed migration actions.

pub mod builder;
pub mod graph;
pub mod models;

pub use builder::{ExpectedState, PlanOutput, PlanStage, USER_INPUT_REQUIRED};
pub use graph::DependencyGraph;
pub use models::{Action, ActionKind, ActionParams, Phase, Plan};
