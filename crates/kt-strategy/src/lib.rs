pub mod base;
pub mod dynamic;
pub mod examples;
pub mod indicators;
pub mod registry;

pub use base::*;
pub use dynamic::*;
pub use examples::*;
pub use indicators::*;
pub use registry::*;
