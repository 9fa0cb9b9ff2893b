use crate::cli::{Cli, OutputFormat};
use crate::graph::ClassDiagram;
use crate::utils::config::{self, DiagramOptions};
use crate::visualization::{DotGenerator, JsonGenerator, SvgGenerator};
use clap::CommandFactory;
use clap_complete::generate;
use std::fs;
use std::io::{self, Write};

/// Initialise `env_logger` on stderr. `RUST_LOG` takes precedence over the
/// level picked from `--verbose`/`--quiet`.
pub fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .try_init();
}

/// Effective options: built-in defaults, then the config file (explicit
/// `--config`, else `docmodel-diagram.toml` under the root), then flags.
///
/// # Errors
/// Returns `ConfigError` if a config file exists but cannot be loaded.
pub fn resolve_options(cli: &Cli) -> Result<DiagramOptions, crate::errors::ConfigError> {
    let mut opts = DiagramOptions::default();
    if let Some(root) = &cli.root {
        opts.root.clone_from(root);
    }
    let cfg = match &cli.config {
        Some(path) => Some((config::load_config_at(path)?, path.parent().map(|p| p.to_path_buf()))),
        None => config::load_config_near(&opts.root)?.map(|c| (c, Some(opts.root.clone()))),
    };
    if let Some((cfg, base)) = cfg {
        opts.apply(cfg, base.as_deref());
    }
    // Flags win over the config file.
    if let Some(root) = &cli.root {
        opts.root.clone_from(root);
    }
    if !cli.modules.is_empty() {
        opts.modules.clone_from(&cli.modules);
    }
    if let Some(name) = &cli.graph_name {
        opts.graph_name.clone_from(name);
    }
    opts.respect_ignore = cli.respect_ignore;
    Ok(opts)
}

/// Run the CLI logic in-process.
///
/// Returns an exit code (0 = success).
#[must_use]
pub fn run_cli(cli: Cli) -> i32 {
    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        let bin_name = env!("CARGO_PKG_NAME");
        generate(shell, &mut cmd, bin_name, &mut io::stdout());
        return 0;
    }

    let (Some(db_host), Some(db_name)) = (cli.db_host.as_deref(), cli.db_name.as_deref()) else {
        eprintln!("Missing database arguments. Provide <DB_HOST> <DB_NAME>.");
        return 2;
    };
    if db_host.trim().is_empty() || db_name.trim().is_empty() {
        eprintln!("Database host and name must not be empty.");
        return 2;
    }
    // The model is read from source; the data store is never contacted.
    log::debug!("data store {db_host}:{}/{db_name} accepted, no connection is made", cli.db_port);

    let opts = match resolve_options(&cli) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Config error: {e}");
            return 1;
        }
    };
    log::debug!("scanning modules {:?} under {}", opts.modules, opts.root.display());

    let diagram = match ClassDiagram::build(&opts) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Diagram build failed: {e}");
            return 1;
        }
    };
    log::debug!(
        "{} classes, {} associations, {} inheritance edges, {} warnings",
        diagram.model.len(),
        diagram.associations.len(),
        diagram.hierarchy.len(),
        diagram.warnings.len()
    );

    let rendered = match cli.format {
        OutputFormat::Dot => DotGenerator::new().generate_dot(&diagram),
        OutputFormat::Json => JsonGenerator::new().generate_json(&diagram),
        OutputFormat::Svg => SvgGenerator::new().generate_svg(&diagram),
    };
    let content = match rendered {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };

    if let Some(path) = &cli.output {
        if let Err(e) = fs::write(path, content) {
            eprintln!("Failed to write output {}: {e}", path.display());
            return 1;
        }
    } else {
        let mut out = io::stdout().lock();
        if let Err(e) = out.write_all(content.as_bytes()).and_then(|()| out.flush()) {
            eprintln!("Failed to write output: {e}");
            return 1;
        }
    }
    0
}
