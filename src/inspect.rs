use anyhow::{Context, Result};
use ascii_table::AsciiTable;
use indoc::indoc;
use log::info;

use crate::catalog::{CatalogSnapshot, ObjectClass};
use crate::config::Connection;
use crate::connection::{Database, DbConnection};

/// Print the roles of the database behind `connection`.
pub fn inspect(connection: &Connection) -> Result<()> {
    let mut conn = DbConnection::connect(&connection.url)
        .with_context(|| format!("could not connect to {}", connection))?;
    let catalog = conn.read_catalog()?;

    // Get the terminal with
    let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(120);

    // Print the table in max size
    let mut table = AsciiTable::default();
    table.set_max_width(term_width.saturating_sub(5).max(20));

    info!(
        "Current roles in {}:\n{}",
        connection,
        table.format(roles_table(&catalog))
    );

    info!(indoc! { r#"
        == Legend ==

        Attributes:
            S = SUPERUSER
            L = LOGIN
            D = CREATEDB
            R = CREATEROLE
            I = INHERIT
            P = REPLICATION
            B = BYPASSRLS

        Privileges: number of schema / table / sequence grants held
    "#});

    Ok(())
}

/// One row per role: attributes, groups, owned schemas and grant counts.
fn roles_table(catalog: &CatalogSnapshot) -> Vec<Vec<String>> {
    let mut rows = vec![
        vec![
            "Role".to_string(),
            "Attributes".to_string(),
            "Conn Limit".to_string(),
            "Valid Until".to_string(),
            "Member Of".to_string(),
            "Owns Schemas".to_string(),
            "Privileges".to_string(),
        ],
        vec!["---".to_string(); 7],
    ];

    for (name, attrs) in &catalog.roles {
        let flags = [
            (attrs.superuser, 'S'),
            (attrs.login, 'L'),
            (attrs.createdb, 'D'),
            (attrs.createrole, 'R'),
            (attrs.inherit, 'I'),
            (attrs.replication, 'P'),
            (attrs.bypassrls, 'B'),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, c)| *c)
        .collect::<String>();

        let schemas = catalog
            .owners
            .iter()
            .filter(|(o, owner)| o.name.is_none() && *owner == name)
            .map(|(o, _)| o.schema.clone())
            .collect::<Vec<_>>()
            .join(", ");

        let count = |class: ObjectClass| {
            catalog
                .grants_of(name)
                .filter(|g| g.object.kind.class() == class)
                .count()
        };

        rows.push(vec![
            name.clone(),
            flags,
            attrs.connection_limit.to_string(),
            attrs.valid_until.clone().unwrap_or_default(),
            catalog.groups_of(name).collect::<Vec<_>>().join(", "),
            schemas,
            format!(
                "{} / {} / {}",
                count(ObjectClass::Schema),
                count(ObjectClass::Tables),
                count(ObjectClass::Sequences)
            ),
        ]);
    }

    rows
}
