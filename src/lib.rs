pub mod chunks;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod locale;
pub mod manager;
pub mod provider;
pub mod retry;
pub mod schema;
pub mod source;
pub mod store;
pub mod translate;
