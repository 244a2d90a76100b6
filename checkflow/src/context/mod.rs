//! Run identity and context types.
//!
//! - [`RunIdentity`]: the `(application, user, session)` key of a run
//! - [`Checkpoint`]: the persisted position marker
//! - [`RunContext`]: the durable state bag of one run
//! - [`StageContext`]: the snapshot a single stage attempt reads from

mod checkpoint;
mod identity;
mod stage_context;
mod state;

pub use checkpoint::{Checkpoint, COMPLETE, START};
pub use identity::RunIdentity;
pub use stage_context::StageContext;
pub use state::RunContext;
