use clap::{Parser, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Dot,
    Json,
    Svg,
}

#[derive(Debug, Parser)]
#[command(
    name = "docmodel-diagram",
    version,
    about = "Generate a UML class diagram of a MongoEngine document model",
    long_about = "Generate a UML class diagram of a MongoEngine document model. Model modules are \
read from source under --root; packages expand to their submodules. The diagram is emitted in \
.dot format on stdout. The database arguments are accepted for compatibility only; no connection \
is made."
)]
pub struct Cli {
    /// Mongo DB host
    #[arg(required_unless_present = "completions")]
    pub db_host: Option<String>,
    /// Mongo DB name
    #[arg(required_unless_present = "completions")]
    pub db_name: Option<String>,
    /// Mongo DB port
    #[arg(long, alias = "db_port", default_value_t = 27017)]
    pub db_port: u16,
    /// Source root that module names are resolved against
    #[arg(short, long)]
    pub root: Option<PathBuf>,
    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Root module to scan (repeatable); replaces the configured list
    #[arg(short, long = "module", value_name = "MODULE")]
    pub modules: Vec<String>,
    /// Name of the emitted digraph
    #[arg(long)]
    pub graph_name: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Dot)]
    pub format: OutputFormat,
    /// Write the diagram to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Skip files matched by .gitignore/.ignore when expanding packages
    #[arg(long, default_value_t = false)]
    pub respect_ignore: bool,
    /// Log debug details to stderr
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,
    /// Suppress warnings
    #[arg(short, long)]
    pub quiet: bool,
    /// Print a shell completion script and exit
    #[arg(long, value_name = "SHELL")]
    pub completions: Option<Shell>,
}

#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_positional_db_args_and_port_default() {
        let cli = Cli::try_parse_from(["docmodel-diagram", "localhost", "clinic"]).unwrap();
        assert_eq!(cli.db_host.as_deref(), Some("localhost"));
        assert_eq!(cli.db_name.as_deref(), Some("clinic"));
        assert_eq!(cli.db_port, 27017);
        assert_eq!(cli.format, OutputFormat::Dot);
    }

    #[test]
    fn test_legacy_port_spelling_and_repeated_modules() {
        let cli = Cli::try_parse_from([
            "docmodel-diagram", "h", "n", "--db_port", "28000", "-m", "model", "-m", "extra",
        ])
        .unwrap();
        assert_eq!(cli.db_port, 28000);
        assert_eq!(cli.modules, vec!["model".to_string(), "extra".to_string()]);
    }

    #[test]
    fn test_db_args_required_unless_completions() {
        assert!(Cli::try_parse_from(["docmodel-diagram", "onlyhost"]).is_err());
        let cli = Cli::try_parse_from(["docmodel-diagram", "--completions", "bash"]).unwrap();
        assert_eq!(cli.completions, Some(Shell::Bash));
    }
}
