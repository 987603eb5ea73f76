//! CLI argument parsing for the game generator.
//!
//! The CLI only wires collaborators together; every decision about
//! selection, extraction, and logging lives in the library modules.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "skelgen",
    version,
    about = "Generate a playable single-file canvas game from a description",
    after_help = "Examples:\n  skelgen generate a cat dodging laser dogs --out /tmp/game\n  skelgen select tetris with gravity flips\n  skelgen sanitize --input response.txt\n  skelgen templates --check\n  skelgen --lm ./mock-lm.sh generate pong --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file (defaults to $SKELGEN_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Local LM command; prompt on stdin, answer on stdout
    #[arg(long, global = true, value_name = "CMD")]
    pub lm: Option<String>,

    /// Read templates from this directory instead of the bundled set
    #[arg(long, global = true, value_name = "DIR")]
    pub templates: Option<PathBuf>,

    /// Emit info-level diagnostics on stderr
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Generate(GenerateArgs),
    Select(SelectArgs),
    Sanitize(SanitizeArgs),
    Templates(TemplatesArgs),
    /// Print the default config as JSON
    Config,
}

#[derive(Parser, Debug)]
#[command(about = "Run the full pipeline and write game.html plus preview.html")]
pub struct GenerateArgs {
    /// Free-text game description
    #[arg(required = true, num_args = 1.., value_name = "DESCRIPTION")]
    pub description: Vec<String>,

    /// Output directory for game.html and preview.html
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub out: PathBuf,

    /// Emit the whole run as JSON
    #[arg(long)]
    pub json: bool,

    /// Echo the generated document on stdout (events go to stderr)
    #[arg(long, conflicts_with = "json")]
    pub print: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Pick a template for a description without generating")]
pub struct SelectArgs {
    /// Free-text game description
    #[arg(required = true, num_args = 1.., value_name = "DESCRIPTION")]
    pub description: Vec<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Extract the document from a saved model response")]
pub struct SanitizeArgs {
    /// Raw response file (reads stdin when omitted)
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Show the template catalog or a single template")]
pub struct TemplatesArgs {
    /// Print one template body
    #[arg(long, value_name = "ID", conflicts_with = "check")]
    pub show: Option<String>,

    /// Verify every template is listed in the catalog and loads
    #[arg(long)]
    pub check: bool,
}
