//! psync CLI entry point.

use clap::Parser;
use psync::cli::commands;
use psync::cli::{Cli, Commands};
use psync::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Set up tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    // Resolve effective JSON mode: --json OR non-TTY stdout
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("psync=info"),
            2 => EnvFilter::new("debug,rusqlite=info,hyper=info,reqwest=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let db = cli.db.as_ref();

    match &cli.command {
        Commands::Pull { .. }
        | Commands::PullFilter { .. }
        | Commands::Orders { .. }
        | Commands::Invoices { .. }
        | Commands::Reset { .. }
        | Commands::Customers { .. }
        | Commands::Salesorders { .. } => {
            commands::sync::execute(&cli.command, db, cli.key.as_deref(), json)
        }

        // Run history
        Commands::Runs {
            kind,
            status,
            limit,
            offset,
        } => commands::runs::list(*kind, *status, *limit, *offset, db, json),
        Commands::Run { id } => commands::runs::show(id, db, json),

        // Mapping and maintenance
        Commands::Mapping { command } => commands::mapping::execute(command, db, json),
        Commands::Sweep => commands::mapping::sweep(db, json),
        Commands::Tables => commands::mapping::tables(json),

        Commands::Completions { shell } => commands::completions::execute(shell),
        Commands::Version => commands::version::execute(json),
    }
}
