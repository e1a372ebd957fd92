pub mod completion;
pub mod overrides;
pub mod results;

pub use overrides::{override_result, OverrideRequest};
pub use results::{evaluate_period, EvalStats};
