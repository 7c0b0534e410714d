use indoc::indoc;
use log::debug;
use postgres::{Client, NoTls};

use crate::catalog::{
    CatalogSnapshot, DbObject, DefaultGrant, Grant, ObjectClass, ObjectKind, RoleAttributes,
};
use crate::error::{CatalogError, DbError};

/// Read side and write side of the database a run works against.
pub trait Database {
    /// Capture roles, memberships, owners, grants and default grants. Never mutates.
    fn read_catalog(&mut self) -> Result<CatalogSnapshot, CatalogError>;

    /// Open the single transaction of a run.
    fn transaction(&mut self) -> Result<Box<dyn Transaction + '_>, DbError>;
}

/// An open transaction. Dropping it without `commit` rolls everything back.
pub trait Transaction {
    fn execute(&mut self, sql: &str) -> Result<(), DbError>;

    fn commit(self: Box<Self>) -> Result<(), DbError>;

    fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

const ROLES_SQL: &str = indoc! {"
    SELECT
      rolname,
      rolsuper,
      rolcanlogin,
      rolinherit,
      rolcreaterole,
      rolcreatedb,
      rolreplication,
      rolbypassrls,
      rolconnlimit,
      CASE
        WHEN rolvaliduntil IS NULL OR rolvaliduntil = 'infinity' THEN NULL
        ELSE to_char(rolvaliduntil, 'YYYY-MM-DD')
      END AS valid_until,
      rolpassword
    FROM pg_authid
"};

const MEMBERSHIPS_SQL: &str = indoc! {"
    SELECT m.rolname AS member, g.rolname AS group_name
    FROM pg_auth_members am
      JOIN pg_authid m ON m.oid = am.member
      JOIN pg_authid g ON g.oid = am.roleid
    WHERE m.rolname !~ '^pg_'
"};

const OWNERS_SQL: &str = indoc! {"
    SELECT 'n' AS kind, n.nspname::text, NULL::text AS relname, pg_get_userbyid(n.nspowner)::text
    FROM pg_namespace n
    UNION ALL
    SELECT c.relkind::text, n.nspname::text, c.relname::text, pg_get_userbyid(c.relowner)::text
    FROM pg_class c
      JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p', 'v', 'm', 'f', 'S')
"};

const LINKED_SEQUENCES_SQL: &str = indoc! {"
    SELECT sn.nspname::text, s.relname::text, t.relkind::text, tn.nspname::text, t.relname::text
    FROM pg_depend d
      JOIN pg_class s ON s.oid = d.objid AND s.relkind = 'S'
      JOIN pg_namespace sn ON sn.oid = s.relnamespace
      JOIN pg_class t ON t.oid = d.refobjid
      JOIN pg_namespace tn ON tn.oid = t.relnamespace
    WHERE d.classid = 'pg_class'::regclass
      AND d.refclassid = 'pg_class'::regclass
      AND d.deptype IN ('a', 'i')
"};

const GRANTS_SQL: &str = indoc! {"
    SELECT pg_get_userbyid(a.grantee)::text, 'n' AS kind, n.nspname::text, NULL::text, a.privilege_type
    FROM pg_namespace n
      CROSS JOIN LATERAL aclexplode(n.nspacl) a
    WHERE a.grantee <> 0
    UNION ALL
    SELECT pg_get_userbyid(a.grantee)::text, c.relkind::text, n.nspname::text, c.relname::text, a.privilege_type
    FROM pg_class c
      JOIN pg_namespace n ON n.oid = c.relnamespace
      CROSS JOIN LATERAL aclexplode(c.relacl) a
    WHERE a.grantee <> 0 AND c.relkind IN ('r', 'p', 'v', 'm', 'f', 'S')
"};

const DEFAULT_GRANTS_SQL: &str = indoc! {"
    SELECT
      pg_get_userbyid(d.defaclrole)::text,
      n.nspname::text,
      d.defaclobjtype::text,
      pg_get_userbyid(a.grantee)::text,
      a.privilege_type
    FROM pg_default_acl d
      JOIN pg_namespace n ON n.oid = d.defaclnamespace
      CROSS JOIN LATERAL aclexplode(d.defaclacl) a
    WHERE a.grantee <> 0
"};

/// A live Postgres connection.
pub struct DbConnection {
    client: Client,
}

impl DbConnection {
    /// Connect to the database at `url`.
    ///
    /// Refer to https://rust-lang-nursery.github.io/rust-cookbook/database/postgres.html
    pub fn connect(url: &str) -> Result<Self, postgres::Error> {
        let client = Client::connect(url, NoTls)?;
        Ok(Self { client })
    }

    fn query(
        &mut self,
        what: &'static str,
        sql: &str,
    ) -> Result<Vec<postgres::Row>, CatalogError> {
        debug!("reading {}", what);
        self.client
            .query(sql, &[])
            .map_err(|source| CatalogError { what, source })
    }

    fn read_roles(&mut self, catalog: &mut CatalogSnapshot) -> Result<(), CatalogError> {
        let what = "roles";
        for row in self.query(what, ROLES_SQL)? {
            let attributes = (|| -> Result<(String, RoleAttributes), postgres::Error> {
                Ok((
                    row.try_get(0)?,
                    RoleAttributes {
                        superuser: row.try_get(1)?,
                        login: row.try_get(2)?,
                        inherit: row.try_get(3)?,
                        createrole: row.try_get(4)?,
                        createdb: row.try_get(5)?,
                        replication: row.try_get(6)?,
                        bypassrls: row.try_get(7)?,
                        connection_limit: row.try_get(8)?,
                        valid_until: row.try_get(9)?,
                        password: row.try_get(10)?,
                    },
                ))
            })()
            .map_err(|source| CatalogError { what, source })?;

            let (name, attributes) = attributes;
            if name.starts_with("pg_") {
                catalog.predefined_roles.insert(name);
            } else {
                catalog.roles.insert(name, attributes);
            }
        }
        Ok(())
    }

    fn read_memberships(&mut self, catalog: &mut CatalogSnapshot) -> Result<(), CatalogError> {
        let what = "role memberships";
        for row in self.query(what, MEMBERSHIPS_SQL)? {
            let pair = (|| -> Result<(String, String), postgres::Error> {
                Ok((row.try_get(0)?, row.try_get(1)?))
            })()
            .map_err(|source| CatalogError { what, source })?;
            catalog.memberships.insert(pair);
        }
        Ok(())
    }

    fn read_owners(&mut self, catalog: &mut CatalogSnapshot) -> Result<(), CatalogError> {
        let what = "object owners";
        for row in self.query(what, OWNERS_SQL)? {
            let (kind, schema, name, owner) = (|| -> Result<_, postgres::Error> {
                let kind: String = row.try_get(0)?;
                let schema: String = row.try_get(1)?;
                let name: Option<String> = row.try_get(2)?;
                let owner: String = row.try_get(3)?;
                Ok((kind, schema, name, owner))
            })()
            .map_err(|source| CatalogError { what, source })?;

            if let Some(object) = to_object(&kind, &schema, name.as_deref()) {
                catalog.owners.insert(object, owner);
            }
        }
        Ok(())
    }

    fn read_linked_sequences(&mut self, catalog: &mut CatalogSnapshot) -> Result<(), CatalogError> {
        let what = "linked sequences";
        for row in self.query(what, LINKED_SEQUENCES_SQL)? {
            let (schema, name, relkind, table_schema, table) = (|| -> Result<_, postgres::Error> {
                let schema: String = row.try_get(0)?;
                let name: String = row.try_get(1)?;
                let relkind: String = row.try_get(2)?;
                let table_schema: String = row.try_get(3)?;
                let table: String = row.try_get(4)?;
                Ok((schema, name, relkind, table_schema, table))
            })()
            .map_err(|source| CatalogError { what, source })?;

            if let Some(table) = to_object(&relkind, &table_schema, Some(&table)) {
                catalog
                    .linked_sequences
                    .insert(DbObject::relation(ObjectKind::Sequence, &schema, &name), table);
            }
        }
        Ok(())
    }

    fn read_grants(&mut self, catalog: &mut CatalogSnapshot) -> Result<(), CatalogError> {
        let what = "object privileges";
        for row in self.query(what, GRANTS_SQL)? {
            let (grantee, kind, schema, name, privilege) = (|| -> Result<_, postgres::Error> {
                let grantee: String = row.try_get(0)?;
                let kind: String = row.try_get(1)?;
                let schema: String = row.try_get(2)?;
                let name: Option<String> = row.try_get(3)?;
                let privilege: String = row.try_get(4)?;
                Ok((grantee, kind, schema, name, privilege))
            })()
            .map_err(|source| CatalogError { what, source })?;

            if let Some(object) = to_object(&kind, &schema, name.as_deref()) {
                catalog.grants.insert(Grant {
                    grantee,
                    object,
                    privilege,
                });
            }
        }
        Ok(())
    }

    fn read_default_grants(&mut self, catalog: &mut CatalogSnapshot) -> Result<(), CatalogError> {
        let what = "default privileges";
        for row in self.query(what, DEFAULT_GRANTS_SQL)? {
            let (grantor, schema, objtype, grantee, privilege) =
                (|| -> Result<_, postgres::Error> {
                    let grantor: String = row.try_get(0)?;
                    let schema: String = row.try_get(1)?;
                    let objtype: String = row.try_get(2)?;
                    let grantee: String = row.try_get(3)?;
                    let privilege: String = row.try_get(4)?;
                    Ok((grantor, schema, objtype, grantee, privilege))
                })()
                .map_err(|source| CatalogError { what, source })?;

            // functions and types are not managed
            let Some(class) = ObjectClass::from_default_acl_type(&objtype) else {
                continue;
            };
            catalog.default_grants.insert(DefaultGrant {
                grantor,
                schema,
                class,
                grantee,
                privilege,
            });
        }
        Ok(())
    }
}

/// Build a catalog object from a kind code, `n` meaning schema and anything else a
/// `pg_class.relkind`.
fn to_object(kind: &str, schema: &str, name: Option<&str>) -> Option<DbObject> {
    match (kind, name) {
        ("n", _) => Some(DbObject::schema(schema)),
        (relkind, Some(name)) => {
            ObjectKind::from_relkind(relkind).map(|kind| DbObject::relation(kind, schema, name))
        }
        _ => None,
    }
}

impl Database for DbConnection {
    fn read_catalog(&mut self) -> Result<CatalogSnapshot, CatalogError> {
        let mut catalog = CatalogSnapshot::default();
        self.read_roles(&mut catalog)?;
        self.read_memberships(&mut catalog)?;
        self.read_owners(&mut catalog)?;
        self.read_linked_sequences(&mut catalog)?;
        self.read_grants(&mut catalog)?;
        self.read_default_grants(&mut catalog)?;

        debug!(
            "catalog: {} roles, {} memberships, {} objects, {} grants, {} default grants",
            catalog.roles.len(),
            catalog.memberships.len(),
            catalog.owners.len(),
            catalog.grants.len(),
            catalog.default_grants.len()
        );
        Ok(catalog)
    }

    fn transaction(&mut self) -> Result<Box<dyn Transaction + '_>, DbError> {
        let inner = self.client.transaction()?;
        Ok(Box::new(PgTransaction { inner }))
    }
}

struct PgTransaction<'a> {
    inner: postgres::Transaction<'a>,
}

impl Transaction for PgTransaction<'_> {
    fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        self.inner.batch_execute(sql)?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.inner.commit()?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.inner.rollback()?;
        Ok(())
    }
}
