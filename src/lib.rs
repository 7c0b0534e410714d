pub mod catalog;
pub mod cli;
pub mod config;
pub mod configure;
pub mod connection;
pub mod error;
pub mod gen;
pub mod inspect;
pub mod reconcile;
pub mod statement;
pub mod validate;

pub use configure::{configure, ConfigureOptions, Mode, Outcome, Report, SUCCESS_MSG};
pub use error::ConfigureError;
