use ansi_term::Colour::{Green, Purple, Yellow};
use ascii_table::AsciiTable;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::config::{load_spec, validate_spec, Environment};
use crate::connection::Database;
use crate::error::{ConfigureError, DbError, ExecutionError};
use crate::reconcile::{reconciler_for, Domain};
use crate::statement::{has_changes, Statement};

/// Printed when a run ends without error.
pub const SUCCESS_MSG: &str = "Configuration finished successfully";

/// What to do with the planned statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Execute everything then roll back.
    Preview,
    /// Execute everything and commit.
    Apply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureOptions {
    spec_path: PathBuf,
    mode: Mode,
    domains: BTreeSet<Domain>,
    prompt: bool,
    verbose: bool,
}

impl ConfigureOptions {
    /// Options for a run over `domains`, which must not be empty.
    pub fn new(
        spec_path: impl Into<PathBuf>,
        mode: Mode,
        domains: impl IntoIterator<Item = Domain>,
    ) -> Result<Self, ConfigureError> {
        let spec_path = spec_path.into();
        if spec_path.as_os_str().is_empty() {
            return Err(ConfigureError::Options("spec path is empty"));
        }

        let domains = domains.into_iter().collect::<BTreeSet<_>>();
        if domains.is_empty() {
            return Err(ConfigureError::Options("every domain is disabled"));
        }

        Ok(Self {
            spec_path,
            mode,
            domains,
            prompt: false,
            verbose: false,
        })
    }

    /// Ask for confirmation before applying.
    pub fn with_prompt(mut self, prompt: bool) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to do, nothing executed.
    NoChanges,
    /// Changes executed and rolled back.
    Previewed,
    /// Changes committed.
    Applied,
    /// The operator said no at the prompt.
    Declined,
}

/// Planned statements per domain, in execution order, plus what happened to them.
#[derive(Debug, Clone)]
pub struct Report {
    pub domains: Vec<(Domain, Vec<Statement>)>,
    pub outcome: Outcome,
}

impl Report {
    pub fn change_count(&self) -> usize {
        self.domains
            .iter()
            .flat_map(|(_, statements)| statements)
            .filter(|s| s.is_change)
            .count()
    }

    /// Human readable report. Only `display` forms are printed.
    pub fn render(&self, verbose: bool) -> String {
        let mut out = String::new();

        for (domain, statements) in &self.domains {
            if !verbose && !has_changes(statements) {
                continue;
            }
            out.push_str(&format!("{}\n", Purple.paint(format!("-- {} --", domain))));
            for statement in statements {
                if statement.is_change || verbose {
                    out.push_str(&format!("{}\n", statement));
                }
            }
            out.push('\n');
        }

        let mut summary = vec![vec!["Domain".to_string(), "Changes".to_string()]];
        summary.push(vec!["---".to_string(), "---".to_string()]);
        for (domain, statements) in &self.domains {
            let count = statements.iter().filter(|s| s.is_change).count();
            summary.push(vec![domain.to_string(), count.to_string()]);
        }

        let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(120);
        let mut table = AsciiTable::default();
        table.set_max_width(term_width.saturating_sub(5).max(20));
        out.push_str(&format!("Summary:\n{}\n", table.format(summary)));

        let changes = self.change_count();
        let outcome = match self.outcome {
            Outcome::NoChanges => Green.paint("No changes needed").to_string(),
            Outcome::Previewed => Yellow
                .paint(format!(
                    "Preview: {} change(s) executed and rolled back. Re-run with --live to apply",
                    changes
                ))
                .to_string(),
            Outcome::Applied => Green
                .paint(format!("Applied {} change(s)", changes))
                .to_string(),
            Outcome::Declined => Yellow
                .paint("Declined: no changes were made")
                .to_string(),
        };
        out.push_str(&format!("{}\n{}\n", outcome, SUCCESS_MSG));

        out
    }
}

/// Where a run is. Each transition is logged at debug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Loaded,
    Validated,
    Snapshotted,
    Reconciling(Domain),
    Finalizing,
    Done,
    Failed,
}

struct Progress {
    stage: Stage,
}

impl Progress {
    fn advance(&mut self, next: Stage) {
        debug!("stage {:?} -> {:?}", self.stage, next);
        self.stage = next;
    }
}

/// Converge the database to the spec.
///
/// `connect` is only called once the spec has loaded and validated. In apply mode with a
/// prompt, `confirm` sees the plan and decides whether to go ahead.
pub fn configure<D, C, P>(
    options: &ConfigureOptions,
    env: &dyn Environment,
    connect: C,
    confirm: P,
) -> Result<Report, ConfigureError>
where
    D: Database,
    C: FnOnce() -> Result<D, DbError>,
    P: FnOnce(&[(Domain, Vec<Statement>)]) -> bool,
{
    let mut progress = Progress { stage: Stage::Idle };
    let result = run(options, env, connect, confirm, &mut progress);
    match &result {
        Ok(_) => progress.advance(Stage::Done),
        Err(_) => progress.advance(Stage::Failed),
    }
    result
}

fn run<D, C, P>(
    options: &ConfigureOptions,
    env: &dyn Environment,
    connect: C,
    confirm: P,
    progress: &mut Progress,
) -> Result<Report, ConfigureError>
where
    D: Database,
    C: FnOnce() -> Result<D, DbError>,
    P: FnOnce(&[(Domain, Vec<Statement>)]) -> bool,
{
    let tree = load_spec(&options.spec_path, env)?;
    progress.advance(Stage::Loaded);

    let spec = validate_spec(&tree).map_err(ConfigureError::Validation)?;
    info!(
        "Loaded {} role(s) from {}",
        spec.len(),
        options.spec_path.display()
    );
    debug!("normalized spec:\n{}", spec);
    progress.advance(Stage::Validated);

    let mut db = connect().map_err(ConfigureError::Connect)?;
    let catalog = db.read_catalog()?;
    progress.advance(Stage::Snapshotted);

    let mut plan = vec![];
    for domain in Domain::ALL {
        if !options.domains.contains(&domain) {
            debug!("{} disabled, skipping", domain);
            continue;
        }
        progress.advance(Stage::Reconciling(domain));

        let mut statements = reconciler_for(domain).analyze(&spec, &catalog)?;
        if !has_changes(&statements) {
            statements.push(Statement::marker("no changes"));
        }
        plan.push((domain, statements));
    }
    progress.advance(Stage::Finalizing);

    let any_changes = plan.iter().any(|(_, statements)| has_changes(statements));
    if !any_changes {
        info!("Database already matches the spec");
        return Ok(Report {
            domains: plan,
            outcome: Outcome::NoChanges,
        });
    }

    if options.mode == Mode::Apply && options.prompt && !confirm(&plan) {
        info!("Changes declined, nothing executed");
        return Ok(Report {
            domains: plan,
            outcome: Outcome::Declined,
        });
    }

    let mut tx = db.transaction().map_err(ConfigureError::Transaction)?;
    for statement in plan.iter().flat_map(|(_, s)| s).filter(|s| s.is_change) {
        debug!("executing: {}", statement.display);

        if let Err(err) = tx.execute(&statement.sql) {
            let error = ExecutionError {
                statement: statement.display.clone(),
                message: statement.redact(&err.to_string()),
            };
            if let Err(err) = tx.rollback() {
                warn!("rollback failed: {}", err);
            }
            return Err(ConfigureError::Execution(error));
        }
    }

    let outcome = match options.mode {
        Mode::Preview => {
            tx.rollback().map_err(ConfigureError::Transaction)?;
            Outcome::Previewed
        }
        Mode::Apply => {
            tx.commit().map_err(ConfigureError::Transaction)?;
            Outcome::Applied
        }
    };

    Ok(Report {
        domains: plan,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogSnapshot, RoleAttributes};
    use crate::connection::Transaction;
    use crate::error::CatalogError;
    use crate::statement::password_hash;
    use indoc::indoc;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io::Write;
    use std::rc::Rc;
    use tempfile::NamedTempFile;

    #[derive(Debug, Default)]
    struct Log {
        executed: Vec<String>,
        committed: Vec<String>,
        rollbacks: usize,
    }

    struct FakeDb {
        catalog: CatalogSnapshot,
        log: Rc<RefCell<Log>>,
        fail_on: Option<&'static str>,
    }

    struct FakeTransaction {
        log: Rc<RefCell<Log>>,
        pending: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl Database for FakeDb {
        fn read_catalog(&mut self) -> Result<CatalogSnapshot, CatalogError> {
            Ok(self.catalog.clone())
        }

        fn transaction(&mut self) -> Result<Box<dyn Transaction + '_>, DbError> {
            Ok(Box::new(FakeTransaction {
                log: self.log.clone(),
                pending: vec![],
                fail_on: self.fail_on,
            }))
        }
    }

    impl Transaction for FakeTransaction {
        fn execute(&mut self, sql: &str) -> Result<(), DbError> {
            if let Some(needle) = self.fail_on {
                if sql.contains(needle) {
                    return Err(format!("db error: ERROR: cannot run {}", sql).into());
                }
            }
            self.log.borrow_mut().executed.push(sql.to_string());
            self.pending.push(sql.to_string());
            Ok(())
        }

        fn commit(self: Box<Self>) -> Result<(), DbError> {
            let FakeTransaction { log, pending, .. } = *self;
            log.borrow_mut().committed.extend(pending);
            Ok(())
        }

        fn rollback(self: Box<Self>) -> Result<(), DbError> {
            self.log.borrow_mut().rollbacks += 1;
            Ok(())
        }
    }

    struct Harness {
        file: NamedTempFile,
        catalog: CatalogSnapshot,
        log: Rc<RefCell<Log>>,
        fail_on: Option<&'static str>,
        env: HashMap<String, String>,
    }

    impl Harness {
        fn new(yaml: &str) -> Self {
            let mut file = NamedTempFile::new().expect("failed to create temp file");
            file.write_all(yaml.as_bytes())
                .expect("failed to write to temp file");
            Self {
                file,
                catalog: CatalogSnapshot::default(),
                log: Rc::new(RefCell::new(Log::default())),
                fail_on: None,
                env: HashMap::new(),
            }
        }

        fn options(&self, mode: Mode) -> ConfigureOptions {
            ConfigureOptions::new(self.file.path(), mode, Domain::ALL).unwrap()
        }

        fn run(&self, options: &ConfigureOptions, answer: bool) -> Result<Report, ConfigureError> {
            let db = FakeDb {
                catalog: self.catalog.clone(),
                log: self.log.clone(),
                fail_on: self.fail_on,
            };
            configure(options, &self.env, || Ok(db), |_| answer)
        }
    }

    #[test]
    fn test_no_changes_executes_nothing() {
        let mut harness = Harness::new("fred:\n");
        harness
            .catalog
            .roles
            .insert("fred".to_string(), RoleAttributes::default());

        let report = harness.run(&harness.options(Mode::Apply), true).unwrap();

        assert_eq!(report.outcome, Outcome::NoChanges);
        assert_eq!(report.change_count(), 0);
        assert!(harness.log.borrow().executed.is_empty());
        assert_eq!(harness.log.borrow().rollbacks, 0);
    }

    #[test]
    fn test_preview_rolls_back() {
        let harness = Harness::new("fred:\n  can_login: yes\n");
        let report = harness.run(&harness.options(Mode::Preview), true).unwrap();

        assert_eq!(report.outcome, Outcome::Previewed);
        let log = harness.log.borrow();
        assert_eq!(log.executed, vec!["CREATE ROLE \"fred\" WITH LOGIN;"]);
        assert!(log.committed.is_empty());
        assert_eq!(log.rollbacks, 1);
    }

    #[test]
    fn test_apply_commits_in_domain_order() {
        let harness = Harness::new(indoc! {"
            fred:
              can_login: yes
              member_of: [readers]
              has_personal_schema: yes
            readers:
        "});
        let report = harness.run(&harness.options(Mode::Apply), true).unwrap();

        assert_eq!(report.outcome, Outcome::Applied);
        assert_eq!(
            harness.log.borrow().committed,
            vec![
                "CREATE ROLE \"fred\" WITH LOGIN;",
                "CREATE ROLE \"readers\";",
                "GRANT \"readers\" TO \"fred\";",
                "CREATE SCHEMA \"fred\" AUTHORIZATION \"fred\";",
            ]
        );
        let domains = report.domains.iter().map(|(d, _)| *d).collect::<Vec<_>>();
        assert_eq!(domains, Domain::ALL.to_vec());
    }

    #[test]
    fn test_declined_prompt_executes_nothing() {
        let harness = Harness::new("fred:\n");
        let options = harness.options(Mode::Apply).with_prompt(true);
        let report = harness.run(&options, false).unwrap();

        assert_eq!(report.outcome, Outcome::Declined);
        assert_eq!(report.change_count(), 1);
        assert!(harness.log.borrow().executed.is_empty());
    }

    #[test]
    fn test_prompt_is_ignored_in_preview() {
        let harness = Harness::new("fred:\n");
        let options = harness.options(Mode::Preview).with_prompt(true);
        let report = harness.run(&options, false).unwrap();

        assert_eq!(report.outcome, Outcome::Previewed);
    }

    #[test]
    fn test_failure_is_rolled_back_and_redacted() {
        let mut harness = Harness::new(indoc! {"
            fred:
              options:
                - PASSWORD: hunter2
        "});
        harness.fail_on = Some("PASSWORD");
        let err = harness
            .run(&harness.options(Mode::Apply), true)
            .unwrap_err();
        let text = err.to_string();

        assert!(matches!(err, ConfigureError::Execution(_)));
        assert!(text.contains("ALTER ROLE \"fred\" WITH ENCRYPTED PASSWORD '******';"));
        assert!(text.contains("rolled back"));
        assert!(!text.contains("hunter2"));
        assert!(!text.contains(&password_hash("fred", "hunter2")));

        let log = harness.log.borrow();
        assert!(log.committed.is_empty());
        assert_eq!(log.rollbacks, 1);
    }

    #[test]
    fn test_invalid_spec_never_connects() {
        let harness = Harness::new("fred:\n  flub: 1\n");
        let options = harness.options(Mode::Apply);
        let err = configure(
            &options,
            &harness.env,
            || -> Result<FakeDb, DbError> { panic!("must not connect") },
            |_| true,
        )
        .unwrap_err();

        match err {
            ConfigureError::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "flub");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_env_vars_fail_the_run() {
        let mut harness = Harness::new(indoc! {"
            fred:
              options:
                - PASSWORD: \"{{ env['FRED_PASSWORD'] }}\"
        "});
        let err = harness
            .run(&harness.options(Mode::Preview), true)
            .unwrap_err();
        assert!(err.to_string().contains("FRED_PASSWORD"));

        harness
            .env
            .insert("FRED_PASSWORD".to_string(), "hunter2".to_string());
        let report = harness.run(&harness.options(Mode::Preview), true).unwrap();
        assert_eq!(report.change_count(), 2);
    }

    #[test]
    fn test_disabled_domains_are_not_planned() {
        let harness = Harness::new("fred:\n  member_of: [readers]\n");
        let options =
            ConfigureOptions::new(harness.file.path(), Mode::Preview, [Domain::Attributes])
                .unwrap();
        let report = harness.run(&options, true).unwrap();

        assert_eq!(report.domains.len(), 1);
        assert_eq!(report.domains[0].0, Domain::Attributes);
    }

    #[test]
    fn test_options_are_validated() {
        assert!(matches!(
            ConfigureOptions::new("", Mode::Preview, Domain::ALL),
            Err(ConfigureError::Options(_))
        ));
        assert!(matches!(
            ConfigureOptions::new("spec.yml", Mode::Preview, []),
            Err(ConfigureError::Options(_))
        ));
    }

    #[test]
    fn test_render() {
        let mut harness = Harness::new("fred:\n  can_login: yes\n");
        harness
            .catalog
            .roles
            .insert("fred".to_string(), RoleAttributes::default());
        let report = harness.run(&harness.options(Mode::Preview), true).unwrap();

        let quiet = report.render(false);
        assert!(quiet.contains("ALTER ROLE \"fred\" WITH LOGIN;"));
        assert!(quiet.contains("Summary"));
        assert!(quiet.contains("rolled back"));
        assert!(quiet.ends_with(&format!("{}\n", SUCCESS_MSG)));
        assert!(!quiet.contains("-- no changes"));

        let verbose = report.render(true);
        assert!(verbose.contains("-- no changes"));
    }
}
