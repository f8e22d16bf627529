pub mod client;
pub mod hub;
pub mod protocol;

pub use hub::RealtimeHub;
