pub mod attributes;
pub mod memberships;
pub mod ownerships;
pub mod privileges;

use std::fmt;

use crate::catalog::CatalogSnapshot;
use crate::config::Spec;
use crate::error::AnalyzeError;
use crate::statement::Statement;

pub use attributes::AttributesReconciler;
pub use memberships::MembershipsReconciler;
pub use ownerships::OwnershipsReconciler;
pub use privileges::PrivilegesReconciler;

/// Permission domains, in the order they must be reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Domain {
    Attributes,
    Memberships,
    Ownerships,
    Privileges,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::Attributes,
        Domain::Memberships,
        Domain::Ownerships,
        Domain::Privileges,
    ];
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Domain::Attributes => write!(f, "attributes"),
            Domain::Memberships => write!(f, "memberships"),
            Domain::Ownerships => write!(f, "ownerships"),
            Domain::Privileges => write!(f, "privileges"),
        }
    }
}

/// Diffs desired state against the catalog for one domain.
///
/// `analyze` is pure: the same inputs always give the same statements, and applying
/// them then re-reading the catalog makes the next `analyze` return no changes.
/// Reconcilers assume every earlier domain has already been applied.
pub trait Reconciler {
    fn domain(&self) -> Domain;

    fn analyze(&self, spec: &Spec, catalog: &CatalogSnapshot) -> Result<Vec<Statement>, AnalyzeError>;
}

/// The reconciler for `domain`.
pub fn reconciler_for(domain: Domain) -> Box<dyn Reconciler> {
    match domain {
        Domain::Attributes => Box::new(AttributesReconciler),
        Domain::Memberships => Box::new(MembershipsReconciler),
        Domain::Ownerships => Box::new(OwnershipsReconciler),
        Domain::Privileges => Box::new(PrivilegesReconciler),
    }
}
