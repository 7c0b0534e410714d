pub mod connection;
pub mod loader;
pub mod spec;
pub mod validator;

pub use connection::Connection;
pub use loader::{load_spec, Environment, ProcessEnv};
pub use spec::{
    split_qualified, Directive, Level, Owns, RoleEntry, RoleOption, SchemaPrivileges, Spec,
};
pub use validator::validate_spec;
