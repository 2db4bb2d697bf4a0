// crates/core/src/lib.rs

pub mod ai_client;
pub mod catalog;
pub mod embedding;
pub mod extension_runner;
pub mod patch;
pub mod responses_client;
pub mod route_source;
pub mod vector_index;
