pub mod handlers;
pub mod ingest;
pub mod prompts;
pub mod records;
pub mod storage;
