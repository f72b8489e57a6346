pub mod acquisition;
pub mod config;
pub mod error;
pub mod experiment;
pub mod link;
pub mod processing;
pub mod protocol;
pub mod replay;
pub mod runtime;
pub mod utils;
