pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use crate::commands::chat::ChatOptions;

#[derive(Debug, Parser)]
#[command(
    name = "rebook",
    about = "Rebook operator CLI",
    long_about = "Prepare the reservation database, inspect configuration, and talk to the \
                  booking-change assistant from a terminal.",
    after_help = "Examples:\n  rebook migrate\n  rebook seed --reset\n  rebook config\n  \
                  rebook chat --seed --thread demo"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo bookings and trips, then verify them against the contract")]
    Seed {
        #[arg(long, help = "Remove seeded rows and their changes before loading")]
        reset: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Chat with the assistant on one conversation thread")]
    Chat {
        #[arg(long, default_value = "cli", help = "Conversation thread id")]
        thread: String,
        #[arg(long, help = "Send one message and print the reply instead of reading stdin")]
        message: Option<String>,
        #[arg(long, help = "Load the demo reservations before the first turn")]
        seed: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { reset } => commands::seed::run(reset),
        Command::Config => commands::config::run(),
        Command::Chat { thread, message, seed } => {
            commands::chat::run(ChatOptions { thread_id: thread, message, seed })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
