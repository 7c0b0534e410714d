use std::collections::BTreeSet;

use super::{Domain, Reconciler};
use crate::catalog::CatalogSnapshot;
use crate::config::Spec;
use crate::error::AnalyzeError;
use crate::statement::{quote_ident, Statement};

/// Converges `member_of` for every role in the spec. Roles outside the spec keep their
/// memberships.
#[derive(Debug, Default, Clone, Copy)]
pub struct MembershipsReconciler;

impl Reconciler for MembershipsReconciler {
    fn domain(&self) -> Domain {
        Domain::Memberships
    }

    fn analyze(&self, spec: &Spec, catalog: &CatalogSnapshot) -> Result<Vec<Statement>, AnalyzeError> {
        let mut statements = vec![];

        for (role, entry) in spec.iter() {
            let current = catalog.groups_of(role).collect::<BTreeSet<_>>();

            for group in &entry.member_of {
                // groups declared in the spec are created by the attributes stage,
                // predefined pg_* roles always exist
                if !spec.contains(group) && !catalog.has_role(group) {
                    return Err(AnalyzeError::new(
                        Domain::Memberships,
                        role,
                        format!("group {} is neither in the spec nor in the database", group),
                    ));
                }

                if !current.contains(group.as_str()) {
                    statements.push(Statement::change(format!(
                        "GRANT {} TO {};",
                        quote_ident(group),
                        quote_ident(role)
                    )));
                }
            }

            for group in current {
                if !entry.member_of.contains(group) {
                    statements.push(Statement::change(format!(
                        "REVOKE {} FROM {};",
                        quote_ident(group),
                        quote_ident(role)
                    )));
                }
            }
        }

        Ok(statements)
    }
}
