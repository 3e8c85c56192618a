pub mod pool;
pub mod request;

pub use pool::WorkerPool;
pub use request::{StageOutcome, StageRequest, StageResponse};
