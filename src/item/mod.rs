pub mod transitions;
pub mod types;

pub use transitions::RetryOutcome;
pub use types::*;
