use serde::{Serialize, Serializer};
use std::fmt;

/// Replaces secret literals in anything a user can see.
pub const PASSWORD_MASK: &str = "'******'";

/// A corrective SQL statement, or a `--` marker that is only ever printed.
///
/// `display` is what reports, logs and errors show. It differs from `sql` only when
/// the statement embeds a secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub is_change: bool,
    pub display: String,
    secret: Option<String>,
}

impl Statement {
    pub fn change(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            display: sql.clone(),
            sql,
            is_change: true,
            secret: None,
        }
    }

    /// A statement carrying `secret` as a quoted literal. `template` holds a single `{}`
    /// placeholder where the literal goes.
    pub fn with_secret(template: &str, secret: &str) -> Self {
        Self {
            sql: template.replacen("{}", &quote_literal(secret), 1),
            is_change: true,
            display: template.replacen("{}", PASSWORD_MASK, 1),
            secret: Some(secret.to_string()),
        }
    }

    pub fn marker(text: impl Into<String>) -> Self {
        let text = format!("-- {}", text.into());
        Self {
            display: text.clone(),
            sql: text,
            is_change: false,
            secret: None,
        }
    }

    /// Scrub this statement's secret from arbitrary text, e.g. a driver error message.
    pub fn redact(&self, text: &str) -> String {
        match &self.secret {
            Some(secret) if !secret.is_empty() => text.replace(secret.as_str(), "******"),
            _ => text.to_string(),
        }
    }
}

// Never print `sql` in debug output, it may carry a password hash.
impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Statement")
            .field("display", &self.display)
            .field("is_change", &self.is_change)
            .finish()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// True when at least one statement is a real change rather than a marker.
pub fn has_changes(statements: &[Statement]) -> bool {
    statements.iter().any(|s| s.is_change)
}

/// Quote a Postgres identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `"schema"."name"`
pub fn quote_qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// The md5 credential Postgres stores for `role`: `md5` followed by md5(password || role).
///
/// ```
/// assert_eq!(
///     rolesmith::statement::password_hash("duyet", "123456"),
///     "md5de3331387913465470ce1772a279be8e"
/// );
/// ```
pub fn password_hash(role: &str, password: &str) -> String {
    let digest = md5::compute(format!("{}{}", password, role));
    format!("md5{:x}", digest)
}

/// A plaintext value that must never be displayed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("******")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("******")
    }
}
