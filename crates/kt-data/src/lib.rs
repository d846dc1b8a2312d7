pub mod bars;
pub mod cache;
pub mod collector;
pub mod storage;

pub use bars::*;
pub use cache::*;
pub use collector::*;
pub use storage::*;
