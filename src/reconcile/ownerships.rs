use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{Domain, Reconciler};
use crate::catalog::{CatalogSnapshot, DbObject, ObjectClass};
use crate::config::{split_qualified, Owns, Spec};
use crate::error::AnalyzeError;
use crate::statement::{quote_ident, Statement};

/// Converges ownership of the schemas, tables and sequences listed under `owns`, and
/// provisions personal schemas.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnershipsReconciler;

impl Reconciler for OwnershipsReconciler {
    fn domain(&self) -> Domain {
        Domain::Ownerships
    }

    fn analyze(&self, spec: &Spec, catalog: &CatalogSnapshot) -> Result<Vec<Statement>, AnalyzeError> {
        Ok(plan(spec, catalog).statements)
    }
}

/// Ownership statements together with the ownership they leave behind.
#[derive(Debug, Clone, Default)]
pub struct OwnershipPlan {
    pub statements: Vec<Statement>,
    /// Owner of every object once `statements` are applied, schemas created by the plan
    /// included.
    pub owners: BTreeMap<DbObject, String>,
}

impl OwnershipPlan {
    pub fn owner_of(&self, object: &DbObject) -> Option<&str> {
        self.owners.get(object).map(|o| o.as_str())
    }

    pub fn schemas(&self) -> impl Iterator<Item = &str> {
        self.owners
            .keys()
            .filter(|o| o.name.is_none())
            .map(|o| o.schema.as_str())
    }
}

/// Work out who should own what, and the statements to get there.
pub fn plan(spec: &Spec, catalog: &CatalogSnapshot) -> OwnershipPlan {
    let mut plan = OwnershipPlan {
        statements: vec![],
        owners: catalog.owners.clone(),
    };

    // explicitly named relations win over another role's `schema.*`
    let mut explicit: HashMap<(String, String, ObjectClass), &str> = HashMap::new();
    for (role, entry) in spec.iter() {
        for (class, names) in relation_claims(&entry.owns) {
            for (schema, name) in names.iter().filter_map(|n| split_qualified(n)) {
                if name != "*" {
                    explicit.insert((schema.to_string(), name.to_string(), class), role);
                }
            }
        }
    }

    for (role, entry) in spec.iter() {
        let mut schemas = entry.owns.schemas.iter().cloned().collect::<BTreeSet<_>>();
        if entry.has_personal_schema {
            schemas.insert(role.clone());
        }

        for schema in &schemas {
            let object = DbObject::schema(schema);
            match plan.owners.get(&object) {
                None => plan.statements.push(Statement::change(format!(
                    "CREATE SCHEMA {} AUTHORIZATION {};",
                    quote_ident(schema),
                    quote_ident(role)
                ))),
                Some(owner) if owner != role => plan.statements.push(alter_owner(&object, role)),
                Some(_) => continue,
            }
            plan.owners.insert(object, role.clone());
        }

        for (class, names) in relation_claims(&entry.owns) {
            for (schema, name) in names.iter().filter_map(|n| split_qualified(n)) {
                let objects = if name == "*" {
                    catalog
                        .relations_in(schema, class)
                        .filter(|o| {
                            let key = (schema.to_string(), o.name.clone().unwrap_or_default(), class);
                            explicit.get(&key).map_or(true, |claimant| *claimant == role.as_str())
                        })
                        .cloned()
                        .collect::<Vec<_>>()
                } else {
                    match catalog.find_relation(schema, name, class) {
                        Some(object) => vec![object.clone()],
                        None => {
                            warn!(
                                "{} {}.{} owned by {} does not exist, skipping",
                                class, schema, name, role
                            );
                            vec![]
                        }
                    }
                };

                for object in objects {
                    // serial and identity sequences move with their table
                    if let Some(table) = catalog.linked_table(&object) {
                        if name == "*" {
                            debug!("{} follows the owner of {}, skipping", object, table);
                        } else {
                            warn!(
                                "sequence {} owned by {} follows the owner of {}, skipping",
                                object, role, table
                            );
                        }
                        continue;
                    }

                    if plan.owners.get(&object).map(String::as_str) != Some(role.as_str()) {
                        plan.statements.push(alter_owner(&object, role));
                        for sequence in catalog.sequences_of(&object) {
                            plan.owners.insert(sequence.clone(), role.clone());
                        }
                        plan.owners.insert(object, role.clone());
                    }
                }
            }
        }
    }

    plan
}

fn relation_claims(owns: &Owns) -> [(ObjectClass, &BTreeSet<String>); 2] {
    [
        (ObjectClass::Tables, &owns.tables),
        (ObjectClass::Sequences, &owns.sequences),
    ]
}

fn alter_owner(object: &DbObject, role: &str) -> Statement {
    Statement::change(format!(
        "ALTER {} {} OWNER TO {};",
        object.kind.keyword(),
        object.quoted(),
        quote_ident(role)
    ))
}
