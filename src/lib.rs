pub mod auth;
pub mod bulk;
pub mod config;
pub mod connectors;
pub mod error;
pub mod output;
pub mod prompt;
pub mod search;
