use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::ownerships::{self, OwnershipPlan};
use super::{Domain, Reconciler};
use crate::catalog::{is_system_schema, CatalogSnapshot, DbObject, ObjectClass};
use crate::config::{Level, RoleEntry, SchemaPrivileges, Spec};
use crate::error::AnalyzeError;
use crate::statement::{quote_ident, Statement};

/// Converges schema, table and sequence privileges plus the default privileges future
/// objects inherit.
///
/// Superusers are skipped, and so is everything a role owns once the ownership stage is
/// applied.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrivilegesReconciler;

impl Reconciler for PrivilegesReconciler {
    fn domain(&self) -> Domain {
        Domain::Privileges
    }

    fn analyze(&self, spec: &Spec, catalog: &CatalogSnapshot) -> Result<Vec<Statement>, AnalyzeError> {
        let plan = ownerships::plan(spec, catalog);
        let mut statements = vec![];

        for (role, entry) in spec.iter() {
            if entry.is_superuser {
                debug!("skipping privileges of superuser {}", role);
                continue;
            }
            statements.extend(RolePrivileges::new(role, entry, catalog, &plan).statements());
        }

        Ok(statements)
    }
}

/// Concrete privileges a level grants on a class of objects.
pub fn privileges_for(class: ObjectClass, level: Level) -> &'static [&'static str] {
    match (class, level) {
        (ObjectClass::Schema, Level::Read) => &["USAGE"],
        (ObjectClass::Schema, Level::Write) => &["USAGE", "CREATE"],
        (ObjectClass::Tables, Level::Read) => &["SELECT"],
        (ObjectClass::Tables, Level::Write) => &[
            "SELECT",
            "INSERT",
            "UPDATE",
            "DELETE",
            "TRUNCATE",
            "REFERENCES",
            "TRIGGER",
        ],
        (ObjectClass::Sequences, Level::Read) => &["SELECT"],
        (ObjectClass::Sequences, Level::Write) => &["SELECT", "USAGE", "UPDATE"],
    }
}

fn levels_of(privileges: &SchemaPrivileges, class: ObjectClass) -> &BTreeSet<Level> {
    match class {
        ObjectClass::Schema => &privileges.schema,
        ObjectClass::Tables => &privileges.tables,
        ObjectClass::Sequences => &privileges.sequences,
    }
}

/// `ON <keyword>` for object grants.
fn grant_keyword(class: ObjectClass) -> &'static str {
    match class {
        ObjectClass::Schema => "SCHEMA",
        ObjectClass::Tables => "TABLE",
        ObjectClass::Sequences => "SEQUENCE",
    }
}

struct RolePrivileges<'a> {
    role: &'a str,
    catalog: &'a CatalogSnapshot,
    plan: &'a OwnershipPlan,
    /// privileges the spec asks for, per schema and class
    desired: BTreeMap<(&'a str, ObjectClass), BTreeSet<&'static str>>,
    /// schemas whose privileges are reconciled for this role
    scope: BTreeSet<&'a str>,
    held: HashSet<(&'a DbObject, &'a str)>,
}

impl<'a> RolePrivileges<'a> {
    fn new(
        role: &'a str,
        entry: &'a RoleEntry,
        catalog: &'a CatalogSnapshot,
        plan: &'a OwnershipPlan,
    ) -> Self {
        let existing = plan.schemas().collect::<BTreeSet<_>>();
        let mut desired = BTreeMap::new();
        let mut scope = existing
            .iter()
            .copied()
            .filter(|s| !is_system_schema(s))
            .collect::<BTreeSet<_>>();

        for (schema, privileges) in &entry.privileges {
            if !existing.contains(schema.as_str()) {
                warn!(
                    "schema {} granted to {} does not exist and is not created by the spec, skipping",
                    schema, role
                );
                continue;
            }
            scope.insert(schema.as_str());

            for class in [ObjectClass::Schema, ObjectClass::Tables, ObjectClass::Sequences] {
                let privs = levels_of(privileges, class)
                    .iter()
                    .flat_map(|level| privileges_for(class, *level).iter().copied())
                    .collect::<BTreeSet<_>>();
                desired.insert((schema.as_str(), class), privs);
            }
        }

        let held = catalog
            .grants_of(role)
            .map(|g| (&g.object, g.privilege.as_str()))
            .collect();

        Self {
            role,
            catalog,
            plan,
            desired,
            scope,
            held,
        }
    }

    fn statements(&self) -> Vec<Statement> {
        let mut statements = vec![];
        for schema in &self.scope {
            statements.extend(self.schema_grants(schema));
            for class in [ObjectClass::Tables, ObjectClass::Sequences] {
                statements.extend(self.relation_grants(schema, class));
            }
            for class in [ObjectClass::Tables, ObjectClass::Sequences] {
                statements.extend(self.default_grants(schema, class));
            }
        }
        statements
    }

    fn wanted(&self, schema: &str, class: ObjectClass) -> BTreeSet<&'static str> {
        self.desired
            .get(&(schema, class))
            .cloned()
            .unwrap_or_default()
    }

    fn owns(&self, object: &DbObject) -> bool {
        self.plan.owner_of(object) == Some(self.role)
    }

    fn schema_grants(&self, schema: &str) -> Vec<Statement> {
        let object = DbObject::schema(schema);
        if self.owns(&object) {
            return vec![];
        }

        let wanted = self.wanted(schema, ObjectClass::Schema);
        let held = self
            .held
            .iter()
            .filter(|(o, _)| **o == object)
            .map(|(_, p)| *p)
            .collect::<BTreeSet<_>>();

        wanted
            .union(&held)
            .filter_map(|privilege| {
                match (wanted.contains(privilege), held.contains(privilege)) {
                    (true, false) => Some(self.grant(privilege, "SCHEMA", &object.quoted())),
                    (false, true) => Some(self.revoke(privilege, "SCHEMA", &object.quoted())),
                    _ => None,
                }
            })
            .collect()
    }

    fn relation_grants(&self, schema: &str, class: ObjectClass) -> Vec<Statement> {
        let objects = self
            .catalog
            .relations_in(schema, class)
            .filter(|o| !self.owns(o))
            .collect::<Vec<_>>();
        if objects.is_empty() {
            return vec![];
        }

        let wanted = self.wanted(schema, class);
        let mut privileges = wanted.clone();
        privileges.extend(
            self.held
                .iter()
                .filter(|(o, _)| objects.contains(o))
                .map(|(_, p)| *p),
        );

        let keyword = grant_keyword(class);
        let mut statements = vec![];
        for privilege in privileges {
            let want = wanted.contains(privilege);
            let targets = objects
                .iter()
                .filter(|o| self.held.contains(&(**o, privilege)) != want)
                .map(|o| o.quoted())
                .collect::<Vec<_>>();
            if targets.is_empty() {
                continue;
            }

            let targets = targets.join(", ");
            statements.push(if want {
                self.grant(privilege, keyword, &targets)
            } else {
                self.revoke(privilege, keyword, &targets)
            });
        }
        statements
    }

    /// Future objects created by the schema owner inherit the desired privileges.
    fn default_grants(&self, schema: &str, class: ObjectClass) -> Vec<Statement> {
        let grantor = self
            .plan
            .owner_of(&DbObject::schema(schema))
            .filter(|owner| *owner != self.role);
        let wanted = match grantor {
            Some(_) => self.wanted(schema, class),
            None => BTreeSet::new(),
        };

        let current = self
            .catalog
            .default_grants
            .iter()
            .filter(|d| d.grantee == self.role && d.schema == schema && d.class == class)
            .collect::<Vec<_>>();

        let mut statements = vec![];
        for entry in &current {
            let keep = Some(entry.grantor.as_str()) == grantor
                && wanted.contains(entry.privilege.as_str());
            if !keep {
                statements.push(self.alter_default(
                    &entry.grantor,
                    schema,
                    &format!(
                        "REVOKE {} ON {} FROM {}",
                        entry.privilege,
                        class.default_keyword(),
                        quote_ident(self.role)
                    ),
                ));
            }
        }

        if let Some(grantor) = grantor {
            for privilege in &wanted {
                let present = current
                    .iter()
                    .any(|d| d.grantor == grantor && d.privilege == *privilege);
                if !present {
                    statements.push(self.alter_default(
                        grantor,
                        schema,
                        &format!(
                            "GRANT {} ON {} TO {}",
                            privilege,
                            class.default_keyword(),
                            quote_ident(self.role)
                        ),
                    ));
                }
            }
        }

        statements
    }

    fn grant(&self, privilege: &str, keyword: &str, targets: &str) -> Statement {
        Statement::change(format!(
            "GRANT {} ON {} {} TO {};",
            privilege,
            keyword,
            targets,
            quote_ident(self.role)
        ))
    }

    fn revoke(&self, privilege: &str, keyword: &str, targets: &str) -> Statement {
        Statement::change(format!(
            "REVOKE {} ON {} {} FROM {};",
            privilege,
            keyword,
            targets,
            quote_ident(self.role)
        ))
    }

    fn alter_default(&self, grantor: &str, schema: &str, action: &str) -> Statement {
        Statement::change(format!(
            "ALTER DEFAULT PRIVILEGES FOR ROLE {} IN SCHEMA {} {};",
            quote_ident(grantor),
            quote_ident(schema),
            action
        ))
    }
}
