mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::pro_forma::{AmortizeArgs, DealArgs, IrrArgs};
use commands::sample::SampleArgs;

/// Real estate pro forma cash flow projections
#[derive(Parser)]
#[command(
    name = "proforma",
    version,
    about = "Real estate pro forma cash flow projections",
    long_about = "A CLI for projecting levered real estate cash flows with decimal \
                  precision. Builds the loan amortization schedule, yearly operating \
                  cash flow, reversion at sale and equity returns (IRR, equity \
                  multiple, cash-on-cash) from a deal file."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log stage-by-stage detail to stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pro forma for a deal file
    Run(DealArgs),
    /// Check a deal file for configuration errors without running it
    Validate(DealArgs),
    /// Build a monthly amortization schedule rolled up to years
    Amortize(AmortizeArgs),
    /// Solve for the internal rate of return of a cash flow stream
    Irr(IrrArgs),
    /// Generate a randomised demo deal
    Sample(SampleArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Run(args) => commands::pro_forma::run_pro_forma(args),
        Commands::Validate(args) => commands::pro_forma::run_validate(args),
        Commands::Amortize(args) => commands::pro_forma::run_amortize(args),
        Commands::Irr(args) => commands::pro_forma::run_irr(args),
        Commands::Sample(args) => commands::sample::run_sample(args),
        Commands::Version => {
            println!("proforma {}", env!("CARGO_PKG_VERSION"));
            process::exit(0);
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            log::debug!("command failed: {e:?}");
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
