pub mod commands;
pub mod logging;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::session::SessionArgs;

#[derive(Debug, Parser)]
#[command(
    name = "pricepoint",
    about = "Pricepoint operator CLI",
    long_about = "Drive pricing quote sessions against the configured quote service, inspect config, and run readiness checks.",
    after_help = "Examples:\n  pricepoint session --product course-rust --team --events qty=3,purchase\n  pricepoint config\n  pricepoint doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run a scripted pricing session and print the settled snapshot")]
    Session {
        #[arg(long, help = "Product to price")]
        product: String,
        #[arg(long, help = "Code-entered coupon id")]
        coupon: Option<String>,
        #[arg(long, help = "Start in team purchase mode")]
        team: bool,
        #[arg(long, help = "Do not let the quote service auto-apply regional pricing")]
        no_auto_ppp: bool,
        #[arg(long, help = "Purchasing user id forwarded to checkout")]
        user: Option<String>,
        #[arg(
            long,
            default_value = "",
            help = "Comma separated steps: qty=N, team, ppp, coupon=ID, coupon=, retry, purchase"
        )]
        events: String,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config and quote service reachability")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Session { product, coupon, team, no_auto_ppp, user, events } => {
            commands::session::run(SessionArgs { product, coupon, team, no_auto_ppp, user, events })
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
