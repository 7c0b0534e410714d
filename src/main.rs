use anyhow::Result;
use env_logger::Env;
use log::info;

use rolesmith::cli::{self, Command};
use rolesmith::config::{Connection, ProcessEnv};
use rolesmith::connection::DbConnection;
use rolesmith::{configure, gen, inspect, validate, ConfigureOptions, Mode};

fn main() -> Result<()> {
    let args = cli::parse();

    // tokio-postgres logs statement text, password hashes included, at debug
    let level = if args.cmd.verbose() {
        "info,rolesmith=debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    match args.cmd {
        Command::Configure {
            spec,
            conn,
            live,
            prompt,
            verbose,
            no_attributes,
            no_memberships,
            no_ownerships,
            no_privileges,
        } => {
            let mode = if live { Mode::Apply } else { Mode::Preview };
            let domains =
                cli::enabled_domains(no_attributes, no_memberships, no_ownerships, no_privileges);
            let options = ConfigureOptions::new(spec, mode, domains)?
                .with_prompt(prompt)
                .with_verbose(verbose);
            let connection = Connection::new(conn.as_deref()).expand_env_vars();

            let report = configure(
                &options,
                &ProcessEnv,
                || {
                    info!("Connecting to {}", connection);
                    DbConnection::connect(&connection.url).map_err(Into::into)
                },
                cli::confirm,
            )?;

            print!("{}", report.render(options.verbose()));
        }

        Command::Validate { file } => validate::validate_target(&file, &ProcessEnv)?,

        Command::Inspect { conn } => {
            inspect::inspect(&Connection::new(conn.as_deref()).expand_env_vars())?
        }

        Command::GenPass {
            length,
            username,
            password,
        } => gen::gen_password(length, username.as_deref(), password.as_deref()),
    }

    Ok(())
}
