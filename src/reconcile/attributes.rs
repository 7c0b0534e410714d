use log::debug;

use super::{Domain, Reconciler};
use crate::catalog::{CatalogSnapshot, RoleAttributes};
use crate::config::validator::is_date;
use crate::config::{RoleEntry, RoleOption, Spec};
use crate::error::AnalyzeError;
use crate::statement::{password_hash, quote_ident, quote_literal, Statement};

/// Converges login, superuser, option flags and passwords.
///
/// Every attribute the spec does not mention converges to the Postgres default, and a
/// role without any password directive has its password cleared.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributesReconciler;

impl Reconciler for AttributesReconciler {
    fn domain(&self) -> Domain {
        Domain::Attributes
    }

    fn analyze(&self, spec: &Spec, catalog: &CatalogSnapshot) -> Result<Vec<Statement>, AnalyzeError> {
        let mut statements = vec![];

        for (role, entry) in spec.iter() {
            let desired = desired_attributes(role, entry)
                .map_err(|message| AnalyzeError::new(Domain::Attributes, role, message))?;

            match catalog.role(role) {
                None => {
                    debug!("role {} does not exist yet", role);
                    statements.extend(create_role(role, &desired));
                }
                Some(current) => statements.extend(alter_role(role, &desired, current)),
            }
        }

        Ok(statements)
    }
}

/// A boolean role flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Superuser,
    Login,
    CreateDb,
    CreateRole,
    Inherit,
    Replication,
    BypassRls,
}

const FLAGS: [(Flag, &str); 7] = [
    (Flag::Superuser, "SUPERUSER"),
    (Flag::Login, "LOGIN"),
    (Flag::CreateDb, "CREATEDB"),
    (Flag::CreateRole, "CREATEROLE"),
    (Flag::Inherit, "INHERIT"),
    (Flag::Replication, "REPLICATION"),
    (Flag::BypassRls, "BYPASSRLS"),
];

fn flag_value(attrs: &RoleAttributes, flag: Flag) -> bool {
    match flag {
        Flag::Superuser => attrs.superuser,
        Flag::Login => attrs.login,
        Flag::CreateDb => attrs.createdb,
        Flag::CreateRole => attrs.createrole,
        Flag::Inherit => attrs.inherit,
        Flag::Replication => attrs.replication,
        Flag::BypassRls => attrs.bypassrls,
    }
}

fn set_flag(attrs: &mut RoleAttributes, flag: Flag, value: bool) {
    let slot = match flag {
        Flag::Superuser => &mut attrs.superuser,
        Flag::Login => &mut attrs.login,
        Flag::CreateDb => &mut attrs.createdb,
        Flag::CreateRole => &mut attrs.createrole,
        Flag::Inherit => &mut attrs.inherit,
        Flag::Replication => &mut attrs.replication,
        Flag::BypassRls => &mut attrs.bypassrls,
    };
    *slot = value;
}

fn flag_keyword(flag: Flag, value: bool) -> String {
    let name = FLAGS
        .iter()
        .find(|(f, _)| *f == flag)
        .map(|(_, name)| *name)
        .unwrap_or_default();
    if value {
        name.to_string()
    } else {
        format!("NO{}", name)
    }
}

/// `CREATEDB` → (CreateDb, true), `NOCREATEDB` → (CreateDb, false)
fn parse_flag(word: &str) -> Option<(Flag, bool)> {
    let upper = word.to_ascii_uppercase();
    FLAGS.iter().find_map(|(flag, name)| {
        if upper == *name {
            Some((*flag, true))
        } else if upper.strip_prefix("NO") == Some(*name) {
            Some((*flag, false))
        } else {
            None
        }
    })
}

/// Case-insensitively strip a leading keyword sequence such as `CONNECTION LIMIT`.
fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let mut rest = text.trim_start();
    for word in keyword.split_whitespace() {
        let head = rest.get(..word.len())?;
        if !head.eq_ignore_ascii_case(word) {
            return None;
        }
        rest = &rest[word.len()..];
        if !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
            return None;
        }
        rest = rest.trim_start();
    }
    Some(rest.trim_end())
}

/// Strip one level of `'…'` or `"…"` quoting.
fn unquote(value: &str) -> String {
    let value = value.trim();
    for quote in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            let inner = &value[1..value.len() - 1];
            let doubled = format!("{}{}", quote, quote);
            return inner.replace(&doubled, &quote.to_string());
        }
    }
    value.to_string()
}

/// The credential Postgres should store. Pre-hashed md5 and SCRAM values pass through.
fn credential(role: &str, password: &str) -> String {
    let is_md5 = password.len() == 35
        && password.starts_with("md5")
        && password[3..].chars().all(|c| c.is_ascii_hexdigit());
    if is_md5 || password.starts_with("SCRAM-SHA-256$") {
        password.to_string()
    } else {
        password_hash(role, password)
    }
}

fn apply_directive(role: &str, text: &str, attrs: &mut RoleAttributes) -> Result<(), String> {
    let password = strip_keyword(text, "ENCRYPTED PASSWORD").or_else(|| strip_keyword(text, "PASSWORD"));
    if let Some(value) = password {
        if value.is_empty() {
            return Err("PASSWORD directive has no value".to_string());
        }
        attrs.password = if value.eq_ignore_ascii_case("NULL") {
            None
        } else {
            Some(credential(role, &unquote(value)))
        };
        return Ok(());
    }

    if let Some(value) = strip_keyword(text, "CONNECTION LIMIT") {
        attrs.connection_limit = value
            .parse::<i32>()
            .ok()
            .filter(|n| *n >= -1)
            .ok_or_else(|| "invalid CONNECTION LIMIT, expected an integer >= -1".to_string())?;
        return Ok(());
    }

    if let Some(value) = strip_keyword(text, "VALID UNTIL") {
        let date = unquote(value);
        attrs.valid_until = if date.eq_ignore_ascii_case("infinity") {
            None
        } else if is_date(&date) {
            Some(date)
        } else {
            return Err("invalid VALID UNTIL, expected YYYY-MM-DD".to_string());
        };
        return Ok(());
    }

    match parse_flag(text.trim()) {
        Some((flag, value)) => {
            set_flag(attrs, flag, value);
            Ok(())
        }
        None => Err("unrecognized attribute (value not shown)".to_string()),
    }
}

/// Attributes the role should end up with, `password` holding the credential to store.
fn desired_attributes(role: &str, entry: &RoleEntry) -> Result<RoleAttributes, String> {
    let mut attrs = RoleAttributes {
        superuser: entry.is_superuser,
        login: entry.can_login,
        ..Default::default()
    };

    for option in &entry.options {
        match option {
            RoleOption::Flag(flag) => {
                let (flag, value) =
                    parse_flag(flag).ok_or("unrecognized option (value not shown)")?;
                set_flag(&mut attrs, flag, value);
            }
            RoleOption::Password(secret) => {
                attrs.password = Some(credential(role, secret.expose()))
            }
            RoleOption::ConnectionLimit(limit) => attrs.connection_limit = *limit,
            RoleOption::ValidUntil(date) => attrs.valid_until = Some(date.clone()),
        }
    }

    for (i, directive) in entry.attributes.iter().enumerate() {
        apply_directive(role, &directive.0, &mut attrs)
            .map_err(|e| format!("attribute {}: {}", i + 1, e))?;
    }

    Ok(attrs)
}

/// Keywords for every attribute that differs from `base`, password excluded.
fn drift_keywords(desired: &RoleAttributes, base: &RoleAttributes) -> Vec<String> {
    let mut keywords = FLAGS
        .iter()
        .filter(|(flag, _)| flag_value(desired, *flag) != flag_value(base, *flag))
        .map(|(flag, _)| flag_keyword(*flag, flag_value(desired, *flag)))
        .collect::<Vec<_>>();

    if desired.connection_limit != base.connection_limit {
        keywords.push(format!("CONNECTION LIMIT {}", desired.connection_limit));
    }

    if desired.valid_until != base.valid_until {
        let until = desired.valid_until.as_deref().unwrap_or("infinity");
        keywords.push(format!("VALID UNTIL {}", quote_literal(until)));
    }

    keywords
}

fn set_password(role: &str, credential: &str) -> Statement {
    let template = format!("ALTER ROLE {} WITH ENCRYPTED PASSWORD {{}};", quote_ident(role));
    Statement::with_secret(&template, credential)
}

fn create_role(role: &str, desired: &RoleAttributes) -> Vec<Statement> {
    let keywords = drift_keywords(desired, &RoleAttributes::default());
    let sql = if keywords.is_empty() {
        format!("CREATE ROLE {};", quote_ident(role))
    } else {
        format!("CREATE ROLE {} WITH {};", quote_ident(role), keywords.join(" "))
    };

    let mut statements = vec![Statement::change(sql)];
    if let Some(credential) = &desired.password {
        statements.push(set_password(role, credential));
    }
    statements
}

fn alter_role(role: &str, desired: &RoleAttributes, current: &RoleAttributes) -> Vec<Statement> {
    let mut statements = drift_keywords(desired, current)
        .into_iter()
        .map(|keyword| Statement::change(format!("ALTER ROLE {} WITH {};", quote_ident(role), keyword)))
        .collect::<Vec<_>>();

    match (&desired.password, &current.password) {
        (Some(wanted), Some(stored)) if wanted == stored => {}
        (Some(wanted), _) => statements.push(set_password(role, wanted)),
        (None, Some(_)) => statements.push(Statement::change(format!(
            "ALTER ROLE {} WITH PASSWORD NULL;",
            quote_ident(role)
        ))),
        (None, None) => {}
    }

    statements
}
