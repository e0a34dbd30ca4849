pub mod config;
pub mod domain;
pub mod endpoint;
pub mod error;
pub mod run;
