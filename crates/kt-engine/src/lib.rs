pub mod engine;
pub mod metrics;
pub mod parallel;
pub mod trade_analyzer;

pub use engine::*;
pub use metrics::*;
pub use parallel::*;
pub use trade_analyzer::*;
