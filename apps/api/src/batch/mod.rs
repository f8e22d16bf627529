pub mod handlers;
pub mod orchestrator;
pub mod processors;
pub mod registry;
pub mod status;

pub use orchestrator::BatchError;
