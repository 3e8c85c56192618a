pub mod state;
pub mod tracker;

pub use state::{Job, Operation, Stage};
pub use tracker::{JobTracker, StageLease};
