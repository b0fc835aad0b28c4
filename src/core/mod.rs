pub mod agent;
pub mod alerts;
pub mod config;
pub mod credentials;
pub mod parser;
pub mod prompt;
pub mod scheduler;
pub mod store;
pub mod vault;
