pub mod builder;
pub mod compare;
pub mod handlers;
pub mod models;
pub mod prompts;
pub mod score;
pub mod store;
pub mod timeline;
