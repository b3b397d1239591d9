use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "deepres", version, about = "Research assistant with a streamed report artifact")]
pub struct Cli {
    /// Settings file to use instead of the per-user default.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ask one research question and stream the answer.
    Ask(AskArgs),
    /// Inspect or create the settings file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Args)]
pub struct AskArgs {
    /// The question; multiple words are joined with spaces.
    #[arg(required = true, num_args = 1..)]
    pub prompt: Vec<String>,

    /// Print every snapshot as one JSON line instead of a final report.
    #[arg(long)]
    pub json: bool,

    /// Write the artifact document to this file.
    #[arg(long, value_name = "PATH")]
    pub artifact_out: Option<PathBuf>,

    /// Override the configured provider (`gemini` or `openai`).
    #[arg(long)]
    pub provider: Option<String>,

    /// Override the configured model.
    #[arg(long)]
    pub model: Option<String>,

    /// Disable Google Search grounding.
    #[arg(long)]
    pub no_search: bool,
}

impl AskArgs {
    pub fn prompt_text(&self) -> String {
        self.prompt.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum ConfigAction {
    /// Print the settings file path.
    Path,
    /// Print the effective settings with the API key redacted.
    Show,
    /// Write default settings if no settings file exists.
    Init,
}
