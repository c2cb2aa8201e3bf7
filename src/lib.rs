pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod federation;
pub mod query;
pub mod report;
pub mod schema;
