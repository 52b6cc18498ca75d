pub mod fetch;
pub mod follow;
pub mod range;

pub use fetch::{BlockError, BlockFetcher, HeightFetcher};
pub use follow::run_follow;
pub use range::{run_range, RangeOutcome, RangeRunnerConfig, RunnerError};
