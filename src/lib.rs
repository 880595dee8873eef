pub mod config;
pub mod dedup;
pub mod llm;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod prompt;
pub mod relevance;
pub mod selector;
pub mod server;
pub mod storage;
