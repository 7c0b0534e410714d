use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::statement::{quote_ident, quote_qualified};

/// Schemas whose contents Postgres manages itself.
pub fn is_system_schema(schema: &str) -> bool {
    schema == "pg_catalog"
        || schema == "information_schema"
        || schema.starts_with("pg_toast")
        || schema.starts_with("pg_temp")
}

/// Current attributes of a role, as stored in `pg_authid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAttributes {
    pub superuser: bool,
    pub login: bool,
    pub inherit: bool,
    pub createrole: bool,
    pub createdb: bool,
    pub replication: bool,
    pub bypassrls: bool,
    pub connection_limit: i32,
    /// `YYYY-MM-DD`, `None` when the role never expires
    pub valid_until: Option<String>,
    /// The stored credential (md5 or SCRAM verifier)
    pub password: Option<String>,
}

/// What `CREATE ROLE` gives you without any options.
impl Default for RoleAttributes {
    fn default() -> Self {
        Self {
            superuser: false,
            login: false,
            inherit: true,
            createrole: false,
            createdb: false,
            replication: false,
            bypassrls: false,
            connection_limit: -1,
            valid_until: None,
            password: None,
        }
    }
}

/// Privilege classes a spec can talk about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectClass {
    Schema,
    Tables,
    Sequences,
}

impl ObjectClass {
    /// Keyword used by `ALTER DEFAULT PRIVILEGES ... ON <keyword>`.
    pub fn default_keyword(&self) -> &'static str {
        match self {
            ObjectClass::Schema => "SCHEMAS",
            ObjectClass::Tables => "TABLES",
            ObjectClass::Sequences => "SEQUENCES",
        }
    }

    /// `pg_default_acl.defaclobjtype`
    pub fn from_default_acl_type(code: &str) -> Option<Self> {
        match code {
            "r" => Some(ObjectClass::Tables),
            "S" => Some(ObjectClass::Sequences),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectClass::Schema => write!(f, "schema"),
            ObjectClass::Tables => write!(f, "tables"),
            ObjectClass::Sequences => write!(f, "sequences"),
        }
    }
}

/// Concrete kinds of catalog objects that can be owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Schema,
    Table,
    View,
    MaterializedView,
    ForeignTable,
    Sequence,
}

impl ObjectKind {
    /// Map `pg_class.relkind`.
    pub fn from_relkind(relkind: &str) -> Option<Self> {
        match relkind {
            "r" | "p" => Some(ObjectKind::Table),
            "v" => Some(ObjectKind::View),
            "m" => Some(ObjectKind::MaterializedView),
            "f" => Some(ObjectKind::ForeignTable),
            "S" => Some(ObjectKind::Sequence),
            _ => None,
        }
    }

    /// Keyword used by `ALTER <keyword> ... OWNER TO`.
    pub fn keyword(&self) -> &'static str {
        match self {
            ObjectKind::Schema => "SCHEMA",
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::MaterializedView => "MATERIALIZED VIEW",
            ObjectKind::ForeignTable => "FOREIGN TABLE",
            ObjectKind::Sequence => "SEQUENCE",
        }
    }

    pub fn class(&self) -> ObjectClass {
        match self {
            ObjectKind::Schema => ObjectClass::Schema,
            ObjectKind::Sequence => ObjectClass::Sequences,
            _ => ObjectClass::Tables,
        }
    }
}

/// A schema, or a relation inside one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DbObject {
    pub kind: ObjectKind,
    pub schema: String,
    /// `None` for schemas
    pub name: Option<String>,
}

impl DbObject {
    pub fn schema(name: &str) -> Self {
        Self {
            kind: ObjectKind::Schema,
            schema: name.to_string(),
            name: None,
        }
    }

    pub fn relation(kind: ObjectKind, schema: &str, name: &str) -> Self {
        Self {
            kind,
            schema: schema.to_string(),
            name: Some(name.to_string()),
        }
    }

    /// Quoted name usable in SQL.
    pub fn quoted(&self) -> String {
        match &self.name {
            Some(name) => quote_qualified(&self.schema, name),
            None => quote_ident(&self.schema),
        }
    }
}

impl fmt::Display for DbObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}.{}", self.schema, name),
            None => write!(f, "{}", self.schema),
        }
    }
}

/// A privilege held by a role on an object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Grant {
    pub grantee: String,
    pub object: DbObject,
    pub privilege: String,
}

/// A default privilege: objects `grantor` creates in `schema` grant `privilege` to `grantee`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefaultGrant {
    pub grantor: String,
    pub schema: String,
    pub class: ObjectClass,
    pub grantee: String,
    pub privilege: String,
}

/// Point-in-time view of the live database, read once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    pub roles: BTreeMap<String, RoleAttributes>,
    /// Built-in `pg_*` roles. Usable as groups, never managed.
    pub predefined_roles: BTreeSet<String>,
    /// `(member, group)` pairs
    pub memberships: BTreeSet<(String, String)>,
    /// Every owned object with its owner
    pub owners: BTreeMap<DbObject, String>,
    /// Serial and identity sequences, mapped to the table they belong to
    pub linked_sequences: BTreeMap<DbObject, DbObject>,
    pub grants: BTreeSet<Grant>,
    pub default_grants: BTreeSet<DefaultGrant>,
}

impl CatalogSnapshot {
    pub fn role(&self, name: &str) -> Option<&RoleAttributes> {
        self.roles.get(name)
    }

    /// Managed or predefined.
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.contains_key(name) || self.predefined_roles.contains(name)
    }

    /// The table a sequence follows for ownership, if any.
    pub fn linked_table(&self, sequence: &DbObject) -> Option<&DbObject> {
        self.linked_sequences.get(sequence)
    }

    pub fn sequences_of<'a>(&'a self, table: &'a DbObject) -> impl Iterator<Item = &'a DbObject> + 'a {
        self.linked_sequences
            .iter()
            .filter(move |(_, t)| *t == table)
            .map(|(sequence, _)| sequence)
    }

    /// Groups `member` currently belongs to.
    pub fn groups_of<'a>(&'a self, member: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.memberships
            .iter()
            .filter(move |(m, _)| m == member)
            .map(|(_, g)| g.as_str())
    }

    /// Relations of the given class inside `schema`.
    pub fn relations_in<'a>(
        &'a self,
        schema: &'a str,
        class: ObjectClass,
    ) -> impl Iterator<Item = &'a DbObject> + 'a {
        self.owners
            .keys()
            .filter(move |o| o.schema == schema && o.name.is_some() && o.kind.class() == class)
    }

    /// Find a relation of the given class by schema and name.
    pub fn find_relation(&self, schema: &str, name: &str, class: ObjectClass) -> Option<&DbObject> {
        self.owners.keys().find(|o| {
            o.schema == schema && o.name.as_deref() == Some(name) && o.kind.class() == class
        })
    }

    /// All schema names, system schemas included.
    pub fn schemas(&self) -> impl Iterator<Item = &str> {
        self.owners
            .keys()
            .filter(|o| o.kind == ObjectKind::Schema)
            .map(|o| o.schema.as_str())
    }

    /// Grants held by `grantee`.
    pub fn grants_of<'a>(&'a self, grantee: &'a str) -> impl Iterator<Item = &'a Grant> + 'a {
        self.grants.iter().filter(move |g| g.grantee == grantee)
    }
}
