use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

use crate::statement::Secret;

/// Desired state for every managed role, in document order.
///
/// For example:
///
/// ```yaml
/// analyst:
///   can_login: yes
///   options:
///     - PASSWORD: "{{ env['ANALYST_PASSWORD'] }}"
///   member_of:
///     - readers
///   has_personal_schema: yes
///   privileges:
///     reporting: [read]
///
/// readers:
///   owns:
///     schemas: [reporting]
///     tables: [reporting.*]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Spec {
    pub roles: IndexMap<String, RoleEntry>,
}

impl Spec {
    pub fn get(&self, role: &str) -> Option<&RoleEntry> {
        self.roles.get(role)
    }

    pub fn contains(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RoleEntry)> {
        self.roles.iter()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match serde_yaml::to_string(self) {
            Ok(yaml) => write!(f, "{}", yaml),
            Err(err) => write!(f, "<unprintable spec: {}>", err),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleEntry {
    pub can_login: bool,
    pub is_superuser: bool,
    pub attributes: Vec<Directive>,
    pub options: Vec<RoleOption>,
    pub member_of: BTreeSet<String>,
    #[serde(skip_serializing_if = "Owns::is_empty")]
    pub owns: Owns,
    pub privileges: IndexMap<String, SchemaPrivileges>,
    pub has_personal_schema: bool,
}

/// A raw attribute directive such as `CREATEDB` or `PASSWORD "secret"`.
#[derive(Clone, PartialEq, Eq)]
pub struct Directive(pub String);

/// Leading words of directives that never carry a secret.
const PLAIN_DIRECTIVES: &[&str] = &[
    "SUPERUSER",
    "LOGIN",
    "CREATEDB",
    "CREATEROLE",
    "INHERIT",
    "REPLICATION",
    "BYPASSRLS",
    "CONNECTION",
    "VALID",
];

impl Directive {
    /// The directive as it may be printed. Anything that is not a known keyword is masked.
    fn masked(&self) -> &str {
        let first = self
            .0
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let word = first.strip_prefix("NO").unwrap_or(&first);

        if PLAIN_DIRECTIVES.contains(&word) || PLAIN_DIRECTIVES.contains(&first.as_str()) {
            self.0.as_str()
        } else if first.starts_with("PASSWORD") || first == "ENCRYPTED" {
            "PASSWORD ******"
        } else {
            "******"
        }
    }
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.masked())
    }
}

impl Serialize for Directive {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.masked())
    }
}

/// Flags accepted as plain strings in `options`.
pub const OPTION_FLAGS: &[&str] = &[
    "LOGIN",
    "NOLOGIN",
    "CREATEDB",
    "NOCREATEDB",
    "CREATEROLE",
    "NOCREATEROLE",
    "INHERIT",
    "NOINHERIT",
    "REPLICATION",
    "NOREPLICATION",
    "BYPASSRLS",
    "NOBYPASSRLS",
];

/// An entry of `options`: an allow-listed flag or a single-key mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOption {
    Flag(String),
    Password(Secret),
    ConnectionLimit(i32),
    ValidUntil(String),
}

impl Serialize for RoleOption {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = match self {
            RoleOption::Flag(flag) => return serializer.serialize_str(flag),
            _ => serializer.serialize_map(Some(1))?,
        };
        match self {
            RoleOption::Password(secret) => map.serialize_entry("PASSWORD", secret)?,
            RoleOption::ConnectionLimit(limit) => map.serialize_entry("CONNECTION LIMIT", limit)?,
            RoleOption::ValidUntil(date) => map.serialize_entry("VALID UNTIL", date)?,
            RoleOption::Flag(_) => {}
        }
        map.end()
    }
}

/// Objects a role should own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Owns {
    pub schemas: BTreeSet<String>,
    /// `schema.table` or `schema.*`
    pub tables: BTreeSet<String>,
    /// `schema.sequence` or `schema.*`
    pub sequences: BTreeSet<String>,
}

impl Owns {
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty() && self.tables.is_empty() && self.sequences.is_empty()
    }
}

/// Privilege level granted on a class of objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Read,
    Write,
}

impl Level {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "read" => Some(Level::Read),
            "write" => Some(Level::Write),
            _ => None,
        }
    }
}

/// Desired levels within one schema, per object class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaPrivileges {
    pub schema: BTreeSet<Level>,
    pub tables: BTreeSet<Level>,
    pub sequences: BTreeSet<Level>,
}

impl SchemaPrivileges {
    /// The same levels for the schema itself, its tables and its sequences.
    pub fn uniform(levels: BTreeSet<Level>) -> Self {
        Self {
            schema: levels.clone(),
            tables: levels.clone(),
            sequences: levels,
        }
    }
}

/// Split `schema.name` into its parts. `name` may be `*`.
pub fn split_qualified(value: &str) -> Option<(&str, &str)> {
    let (schema, name) = value.split_once('.')?;
    if schema.is_empty() || name.is_empty() || name.contains('.') {
        return None;
    }
    Some((schema, name))
}
