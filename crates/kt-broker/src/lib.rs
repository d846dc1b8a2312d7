pub mod account;
pub mod adapter;
pub mod broker;
pub mod client;
pub mod clock;
pub mod endpoints;
pub mod error;
pub mod market;
pub mod market_status;
pub mod mock;
pub mod oauth;
pub mod realtime;

pub use account::*;
pub use adapter::*;
pub use broker::*;
pub use client::*;
pub use clock::*;
pub use error::*;
pub use market::*;
pub use market_status::*;
pub use mock::*;
pub use oauth::*;
pub use realtime::*;
