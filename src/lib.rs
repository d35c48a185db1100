pub mod aggregate;
pub mod builder;
pub mod cli;
pub mod config;
pub mod dialect;
pub mod error;
pub mod inject;
pub mod instrument;
pub mod locator;
pub mod model;
pub mod protocol;
pub mod scanner;
