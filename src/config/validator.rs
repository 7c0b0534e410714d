use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeSet, HashMap};

use super::spec::{
    split_qualified, Directive, Level, Owns, RoleEntry, RoleOption, SchemaPrivileges, Spec,
    OPTION_FLAGS,
};
use crate::error::ValidationError;
use crate::statement::Secret;

/// Field names recognised on a role entry.
pub const ROLE_FIELDS: &[&str] = &[
    "can_login",
    "is_superuser",
    "attributes",
    "options",
    "member_of",
    "memberships",
    "owns",
    "privileges",
    "has_personal_schema",
];

const OWNS_FIELDS: &[&str] = &["schemas", "tables", "sequences"];
const PRIVILEGE_CLASSES: &[&str] = &["schema", "tables", "sequences"];

/// Build a typed [`Spec`] from the loaded tree, or return every field-level problem.
pub fn validate_spec(tree: &Value) -> Result<Spec, Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut spec = Spec::default();

    let roles = match tree {
        Value::Null => return Ok(spec),
        Value::Mapping(roles) => roles,
        _ => {
            return Err(vec![ValidationError::new(
                "<root>",
                "<root>",
                "spec must be a mapping of role name to role entry",
            )])
        }
    };

    for (key, value) in roles {
        let name = match key.as_str() {
            Some(name) if !name.is_empty() => name,
            _ => {
                errors.push(ValidationError::new(
                    &render_key(key),
                    "<name>",
                    "role name must be a non-empty string",
                ));
                continue;
            }
        };

        if name.starts_with("pg_") {
            errors.push(ValidationError::new(
                name,
                "<name>",
                "role names starting with pg_ are reserved by Postgres",
            ));
            continue;
        }

        if let Some(entry) = validate_role(name, value, &mut errors) {
            spec.roles.insert(name.to_string(), entry);
        }
    }

    check_ownership_conflicts(&spec, &mut errors);

    if errors.is_empty() {
        Ok(spec)
    } else {
        Err(errors)
    }
}

fn validate_role(name: &str, value: &Value, errors: &mut Vec<ValidationError>) -> Option<RoleEntry> {
    let mut entry = RoleEntry::default();

    let fields = match value {
        Value::Null => return Some(entry),
        Value::Mapping(fields) => fields,
        _ => {
            errors.push(ValidationError::new(name, "<entry>", "role entry must be a mapping"));
            return None;
        }
    };

    if fields.contains_key("member_of") && fields.contains_key("memberships") {
        errors.push(ValidationError::new(
            name,
            "memberships",
            "use either member_of or memberships, not both",
        ));
    }

    for (key, value) in fields {
        let field = match key.as_str() {
            Some(field) => field,
            None => {
                errors.push(ValidationError::new(name, &render_key(key), "unknown field"));
                continue;
            }
        };

        let mut push = |message: String| errors.push(ValidationError::new(name, field, message));

        match field {
            "can_login" => match as_bool(value) {
                Some(b) => entry.can_login = b,
                None => push("must be a boolean".to_string()),
            },
            "is_superuser" => match as_bool(value) {
                Some(b) => entry.is_superuser = b,
                None => push("must be a boolean".to_string()),
            },
            "has_personal_schema" => match as_bool(value) {
                Some(b) => entry.has_personal_schema = b,
                None => push("must be a boolean".to_string()),
            },
            "attributes" => match string_list(value) {
                Ok(items) => entry.attributes = items.into_iter().map(Directive).collect(),
                Err(message) => push(message),
            },
            "options" => match options(value) {
                Ok(options) => entry.options = options,
                Err(message) => push(message),
            },
            "member_of" | "memberships" => match string_list(value) {
                Ok(groups) if groups.iter().any(|g| g == name) => {
                    push("a role cannot be a member of itself".to_string())
                }
                Ok(groups) => entry.member_of = groups.into_iter().collect(),
                Err(message) => push(message),
            },
            "owns" => match owns(value) {
                Ok(owns) => entry.owns = owns,
                Err(message) => push(message),
            },
            "privileges" => match privileges(value) {
                Ok(privileges) => entry.privileges = privileges,
                Err(message) => push(message),
            },
            _ => push("unknown field".to_string()),
        }
    }

    Some(entry)
}

/// YAML 1.2 only knows `true`/`false`; spec files commonly use `yes`/`no` as well.
fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" | "on" => Some(true),
            "no" | "n" | "false" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn string_list(value: &Value) -> Result<Vec<String>, String> {
    let items = match value {
        Value::Null => return Ok(vec![]),
        Value::Sequence(items) => items,
        _ => return Err("must be a list of strings".to_string()),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
            _ => Err(format!(
                "must be a list of strings, item {} is {}",
                i + 1,
                shape(item)
            )),
        })
        .collect()
}

fn options(value: &Value) -> Result<Vec<RoleOption>, String> {
    let items = match value {
        Value::Null => return Ok(vec![]),
        Value::Sequence(items) => items,
        _ => return Err("must be a list".to_string()),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| option(item).map_err(|e| format!("item {}: {}", i + 1, e)))
        .collect()
}

/// Rejected values are never echoed: templates have been resolved and may hold secrets.
fn option(item: &Value) -> Result<RoleOption, String> {
    match item {
        Value::String(flag) => {
            let upper = flag.trim().to_ascii_uppercase();
            if OPTION_FLAGS.contains(&upper.as_str()) {
                Ok(RoleOption::Flag(upper))
            } else {
                Err(format!(
                    "unknown option (value not shown), expected one of {:?} or a single-key mapping",
                    OPTION_FLAGS
                ))
            }
        }
        Value::Mapping(map) if map.len() == 1 => {
            let (key, value) = map.iter().next().ok_or("empty option mapping")?;
            let key = key
                .as_str()
                .map(|k| k.trim().to_ascii_uppercase())
                .unwrap_or_default();

            match key.as_str() {
                "PASSWORD" => match value {
                    Value::String(s) => Ok(RoleOption::Password(Secret::new(s.clone()))),
                    Value::Number(n) => Ok(RoleOption::Password(Secret::new(n.to_string()))),
                    _ => Err("PASSWORD must be a string".to_string()),
                },
                "CONNECTION LIMIT" | "CONNECTION_LIMIT" => value
                    .as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .filter(|n| *n >= -1)
                    .map(RoleOption::ConnectionLimit)
                    .ok_or_else(|| "CONNECTION LIMIT must be an integer >= -1".to_string()),
                "VALID UNTIL" | "VALID_UNTIL" => value
                    .as_str()
                    .filter(|s| is_date(s))
                    .map(|s| RoleOption::ValidUntil(s.to_string()))
                    .ok_or_else(|| "VALID UNTIL must be a date (YYYY-MM-DD)".to_string()),
                _ => Err(
                    "unknown option key (value not shown), expected PASSWORD, CONNECTION LIMIT or VALID UNTIL"
                        .to_string(),
                ),
            }
        }
        Value::Mapping(_) => Err("option mappings must have exactly one key".to_string()),
        other => Err(format!(
            "options must be flags or single-key mappings, found {}",
            shape(other)
        )),
    }
}

/// `YYYY-MM-DD`
pub fn is_date(value: &str) -> bool {
    let parts = value.split('-').collect::<Vec<_>>();
    parts.len() == 3
        && [4, 2, 2]
            .iter()
            .zip(&parts)
            .all(|(len, part)| part.len() == *len && part.chars().all(|c| c.is_ascii_digit()))
}

fn owns(value: &Value) -> Result<Owns, String> {
    let map = match value {
        Value::Null => return Ok(Owns::default()),
        Value::Mapping(map) => map,
        _ => return Err(format!("must be a mapping with keys {:?}", OWNS_FIELDS)),
    };

    let mut owns = Owns::default();
    for (key, items) in map {
        let key = key.as_str().unwrap_or_default();
        let items = string_list(items).map_err(|e| format!("{}: {}", key, e))?;

        match key {
            "schemas" => owns.schemas = items.into_iter().collect(),
            "tables" | "sequences" => {
                if let Some(bad) = items.iter().find(|i| split_qualified(i).is_none()) {
                    return Err(format!(
                        "{}: '{}' must be written as schema.name or schema.*",
                        key, bad
                    ));
                }
                if key == "tables" {
                    owns.tables = items.into_iter().collect();
                } else {
                    owns.sequences = items.into_iter().collect();
                }
            }
            _ => return Err(format!("unknown key '{}', expected {:?}", key, OWNS_FIELDS)),
        }
    }

    Ok(owns)
}

fn privileges(value: &Value) -> Result<IndexMap<String, SchemaPrivileges>, String> {
    let map = match value {
        Value::Null => return Ok(IndexMap::new()),
        Value::Mapping(map) => map,
        _ => return Err("must be a mapping of schema name to privilege levels".to_string()),
    };

    let mut privileges = IndexMap::new();
    for (schema, levels) in map {
        let schema = match schema.as_str() {
            Some(schema) if !schema.is_empty() => schema,
            _ => return Err("schema names must be non-empty strings".to_string()),
        };

        let entry = match levels {
            Value::Sequence(_) => SchemaPrivileges::uniform(level_set(schema, levels)?),
            Value::Mapping(classes) => per_class(schema, classes)?,
            _ => {
                return Err(format!(
                    "{}: expected a list of levels or a mapping of {:?} to levels",
                    schema, PRIVILEGE_CLASSES
                ))
            }
        };
        privileges.insert(schema.to_string(), entry);
    }

    Ok(privileges)
}

fn per_class(schema: &str, classes: &Mapping) -> Result<SchemaPrivileges, String> {
    let mut entry = SchemaPrivileges::default();
    for (class, levels) in classes {
        let levels = level_set(schema, levels)?;
        match class.as_str().unwrap_or_default() {
            "schema" => entry.schema = levels,
            "tables" => entry.tables = levels,
            "sequences" => entry.sequences = levels,
            other => {
                return Err(format!(
                    "{}: unknown object class '{}', expected {:?}",
                    schema, other, PRIVILEGE_CLASSES
                ))
            }
        }
    }
    Ok(entry)
}

fn level_set(schema: &str, value: &Value) -> Result<BTreeSet<Level>, String> {
    string_list(value)
        .map_err(|e| format!("{}: {}", schema, e))?
        .iter()
        .map(|level| {
            Level::parse(level).ok_or_else(|| {
                format!("{}: unknown privilege level '{}', expected read or write", schema, level)
            })
        })
        .collect()
}

/// Each object may be claimed by one role only; personal schemas count as claims.
fn check_ownership_conflicts(spec: &Spec, errors: &mut Vec<ValidationError>) {
    let mut claims: HashMap<String, &str> = HashMap::new();

    for (role, entry) in spec.iter() {
        let mut objects = entry
            .owns
            .schemas
            .iter()
            .map(|s| ("owns.schemas", format!("schema {}", s)))
            .collect::<Vec<_>>();
        if entry.has_personal_schema {
            objects.push(("has_personal_schema", format!("schema {}", role)));
        }
        objects.extend(entry.owns.tables.iter().map(|t| ("owns.tables", format!("table {}", t))));
        objects.extend(
            entry
                .owns
                .sequences
                .iter()
                .map(|s| ("owns.sequences", format!("sequence {}", s))),
        );

        for (field, object) in objects {
            match claims.get(&object).copied() {
                Some(owner) if owner != role.as_str() => errors.push(ValidationError::new(
                    role,
                    field,
                    format!("{} is already owned by role {}", object, owner),
                )),
                Some(_) => {}
                None => {
                    claims.insert(object, role.as_str());
                }
            }
        }
    }
}

/// What kind of YAML value this is, without its content.
fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "empty",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "an empty string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn render_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "?".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn parse(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_verify_spec_fails_on_unknown_field() {
        let tree = parse(indoc! {"
            fred:
              attribute:
                - flub
        "});

        let errors = validate_spec(&tree).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "role=fred field=attribute: unknown field");
    }

    #[test]
    fn test_verify_spec_succeeds() {
        let tree = parse(indoc! {"
            fred:
              attributes:
                - flub

            mark:
        "});

        let spec = validate_spec(&tree).unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.get("fred").unwrap().attributes, vec![Directive("flub".to_string())]);
        assert_eq!(spec.get("mark").unwrap(), &RoleEntry::default());
    }

    #[test]
    fn test_reports_every_error() {
        let tree = parse(indoc! {"
            fred:
              can_login: maybe
              options:
                - SUPERPOWERS
              owns:
                tables: [no_schema]
            mark:
              member_of: mark
              privileges:
                public: [admin]
        "});

        let errors = validate_spec(&tree)
            .unwrap_err()
            .iter()
            .map(|e| format!("{}/{}", e.role, e.field))
            .collect::<Vec<_>>();

        assert_eq!(
            errors,
            vec![
                "fred/can_login",
                "fred/options",
                "fred/owns",
                "mark/member_of",
                "mark/privileges"
            ]
        );
    }

    #[test]
    fn test_full_entry() {
        let tree = parse(indoc! {r#"
            admin:
              can_login: yes
              is_superuser: true
              options:
                - createdb
                - PASSWORD: "secret"
                - CONNECTION LIMIT: 10
                - VALID UNTIL: "2030-01-01"
              memberships: [readers]
              owns:
                schemas: [finance]
                tables: [finance.*]
                sequences: [finance.invoice_id_seq]
              privileges:
                public: [read]
                staging:
                  schema: [write]
                  tables: [read]
              has_personal_schema: yes
            readers:
        "#});

        let spec = validate_spec(&tree).unwrap();
        let admin = spec.get("admin").unwrap();

        assert!(admin.can_login && admin.is_superuser && admin.has_personal_schema);
        assert_eq!(
            admin.options,
            vec![
                RoleOption::Flag("CREATEDB".to_string()),
                RoleOption::Password(Secret::new("secret")),
                RoleOption::ConnectionLimit(10),
                RoleOption::ValidUntil("2030-01-01".to_string()),
            ]
        );
        assert!(admin.member_of.contains("readers"));
        assert!(admin.owns.tables.contains("finance.*"));

        let public = &admin.privileges["public"];
        assert_eq!(public.schema, BTreeSet::from([Level::Read]));
        assert_eq!(public.sequences, BTreeSet::from([Level::Read]));

        let staging = &admin.privileges["staging"];
        assert_eq!(staging.schema, BTreeSet::from([Level::Write]));
        assert_eq!(staging.tables, BTreeSet::from([Level::Read]));
        assert!(staging.sequences.is_empty());
    }

    #[test]
    fn test_preserves_role_order() {
        let tree = parse("zed:\nalpha:\nmike:\n");
        let spec = validate_spec(&tree).unwrap();
        let names = spec.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["zed", "alpha", "mike"]);
    }

    #[test]
    fn test_misplaced_passwords_are_not_echoed() {
        let tree = parse(indoc! {"
            fred:
              options:
                - PASSWORD supersecret
              attributes:
                - PASSWORD: hunter2
        "});

        let errors = validate_spec(&tree)
            .unwrap_err()
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>();

        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("role=fred field=options: item 1: unknown option"));
        assert_eq!(
            errors[1],
            "role=fred field=attributes: must be a list of strings, item 1 is a mapping"
        );
        for error in &errors {
            assert!(!error.contains("supersecret"));
            assert!(!error.contains("hunter2"));
        }
    }

    #[test]
    fn test_rejects_reserved_role_names() {
        let tree = parse("pg_monitor:\nfred:\n  member_of: [pg_monitor]\n");

        let errors = validate_spec(&tree).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].role, "pg_monitor");
    }

    #[test]
    fn test_rejects_conflicting_owners() {
        let tree = parse(indoc! {"
            alice:
              owns:
                schemas: [bob]
            bob:
              has_personal_schema: yes
        "});

        let errors = validate_spec(&tree).unwrap_err();
        assert_eq!(
            errors[0].to_string(),
            "role=bob field=has_personal_schema: schema bob is already owned by role alice"
        );
    }

    #[test]
    fn test_rejects_both_membership_keys() {
        let tree = parse(indoc! {"
            fred:
              member_of: [a]
              memberships: [b]
        "});

        let errors = validate_spec(&tree).unwrap_err();
        assert_eq!(errors[0].field, "memberships");
    }

    #[test]
    fn test_rejects_non_mapping_root() {
        let errors = validate_spec(&parse("- fred\n- mark\n")).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].role, "<root>");
    }

    #[test]
    fn test_is_date() {
        assert!(is_date("2030-01-01"));
        assert!(!is_date("2030-1-01"));
        assert!(!is_date("tomorrow"));
    }
}
