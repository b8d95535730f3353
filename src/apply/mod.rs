//! Apply stage: idempotent execution of the plan against the destination,
//! with dry-run simulation, checkpointed resume, and compensating rollback.

pub mod actions;
pub mod rollback;
pub mod stage;

pub use actions::{ActionResult, ActionRunner, ApplyContext, SimulationOutcome};
pub use rollback::{rollback_migration_file, RollbackReport};
pub use stage::{ApplyOptions, ApplyOutput, ApplyStage};
