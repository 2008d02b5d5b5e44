// src/cli/mod.rs — CLI definition (clap derive)

pub mod progress;
pub mod run;
pub mod status;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "rlm",
    about = "Answer a query over a large context by letting a model write and run code",
    version
)]
pub struct Cli {
    /// Query to answer (default command when no subcommand given)
    #[arg(trailing_var_arg = true)]
    pub query: Vec<String>,

    /// Context file, or `-` for stdin. `.json` files are parsed as JSON
    #[arg(short, long)]
    pub context: Option<String>,

    /// Model to use (provider/model, or a model id a provider lists)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Max iterations for the root run
    #[arg(short = 'n', long)]
    pub max_iterations: Option<u32>,

    /// Levels of nested sub-calls allowed (0 disables llm_query)
    #[arg(short, long)]
    pub depth: Option<u32>,

    /// Token ceiling for the whole run, sub-calls included
    #[arg(long)]
    pub max_tokens: Option<u64>,

    /// Cost ceiling in USD for the whole run, sub-calls included
    #[arg(long)]
    pub max_cost: Option<f64>,

    /// Config file path
    #[arg(long)]
    pub config: Option<String>,

    /// Write the run trace as JSON. Without a value, a file under the data directory is used
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    pub trace: Option<String>,

    /// Replay model replies from a JSON array of strings instead of calling a provider
    #[arg(long)]
    pub scripted: Option<String>,

    /// Suppress progress output (only emit the answer)
    #[arg(short, long)]
    pub quiet: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List providers found in the environment and their models
    Models,
    /// Print the effective configuration as TOML
    Config,
}
