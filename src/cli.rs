use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use structopt::StructOpt;

use crate::reconcile::Domain;
use crate::statement::{has_changes, Statement};

/// Converge Postgres roles, memberships, ownerships and privileges to a YAML spec
#[derive(Debug, StructOpt)]
pub struct Cli {
    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Converge the database to a spec file. Previews unless --live is given
    Configure {
        /// The spec file
        #[structopt(parse(from_os_str))]
        spec: PathBuf,

        /// Connection url, `${VAR}` is expanded from the environment
        #[structopt(short, long)]
        conn: Option<String>,

        /// Commit the changes instead of rolling them back
        #[structopt(long)]
        live: bool,

        /// Ask before committing
        #[structopt(long)]
        prompt: bool,

        /// Debug logging, and show domains without changes
        #[structopt(short, long)]
        verbose: bool,

        /// Skip role attributes
        #[structopt(long)]
        no_attributes: bool,

        /// Skip role memberships
        #[structopt(long)]
        no_memberships: bool,

        /// Skip object ownerships
        #[structopt(long)]
        no_ownerships: bool,

        /// Skip privileges
        #[structopt(long)]
        no_privileges: bool,
    },

    /// Validate a spec file, or every spec under a directory
    Validate {
        /// The path to the file or directory to read
        #[structopt(short, long, parse(from_os_str), default_value = ".")]
        file: PathBuf,
    },

    /// Inspect roles in the current database
    Inspect {
        /// Connection url, `${VAR}` is expanded from the environment
        #[structopt(short, long)]
        conn: Option<String>,
    },

    /// Generate random password
    GenPass {
        /// The password length
        #[structopt(short, long, default_value = "16")]
        length: u8,
        /// The username, using to create md5 hash
        #[structopt(short, long)]
        username: Option<String>,
        /// The password, using to create md5 hash
        #[structopt(short, long)]
        password: Option<String>,
    },
}

impl Command {
    pub fn verbose(&self) -> bool {
        matches!(self, Command::Configure { verbose: true, .. })
    }
}

/// Domains left enabled by the `--no-*` flags.
pub fn enabled_domains(
    no_attributes: bool,
    no_memberships: bool,
    no_ownerships: bool,
    no_privileges: bool,
) -> Vec<Domain> {
    Domain::ALL
        .into_iter()
        .filter(|domain| match domain {
            Domain::Attributes => !no_attributes,
            Domain::Memberships => !no_memberships,
            Domain::Ownerships => !no_ownerships,
            Domain::Privileges => !no_privileges,
        })
        .collect()
}

/// Show the planned changes and ask on the terminal whether to commit them.
pub fn confirm(plan: &[(Domain, Vec<Statement>)]) -> bool {
    for (domain, statements) in plan {
        if !has_changes(statements) {
            continue;
        }
        println!("-- {} --", domain);
        for statement in statements.iter().filter(|s| s.is_change) {
            println!("{}", statement);
        }
    }

    print!("Apply these changes? [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => is_yes(&answer),
        Err(_) => false,
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

// Parse the command line arguments
pub fn parse() -> Cli {
    Cli::from_args()
}
