use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use confpit::{
    FileSource, MergedView, PitBuilder, PitError, PitOptions, Result, Settings, Source, SourceSet,
};

/// confpit: watch layered configuration sources and print the merged result
#[derive(Parser)]
#[command(name = "confpit", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every merged view as sources change, until Ctrl-C
    Watch {
        #[command(flatten)]
        sources: SourceArgs,
    },
    /// Print the initial merged view and exit
    Show {
        #[command(flatten)]
        sources: SourceArgs,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Directory to search; repeat for more (later paths take precedence)
    #[arg(short, long = "path", required = true)]
    paths: Vec<PathBuf>,

    /// Config file name without extension (default: from options, usually "config")
    #[arg(short, long, conflicts_with = "glob")]
    name: Option<String>,

    /// Glob matched against file names in each path, e.g. "*.yaml"
    #[arg(short, long)]
    glob: Option<String>,

    /// File with base defaults (lowest precedence)
    #[arg(short, long)]
    base: Option<PathBuf>,

    /// TOML file with aggregator options
    #[arg(short, long)]
    options: Option<PathBuf>,

    /// Prefix for environment overrides (APP → APP_SERVER_PORT)
    #[arg(short, long, env = "CONFPIT_ENV_PREFIX")]
    env_prefix: Option<String>,

    /// Output format for merged views
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
    Toml,
}

impl SourceArgs {
    fn options(&self) -> Result<PitOptions> {
        let mut options = match &self.options {
            Some(path) => PitOptions::load(path)?,
            None => PitOptions::default(),
        };
        if let Some(prefix) = &self.env_prefix {
            options.env_prefix = Some(prefix.clone());
        }
        Ok(options)
    }

    fn builder(&self, options: PitOptions) -> Result<PitBuilder> {
        let set = match (&self.glob, &self.name) {
            (Some(pattern), _) => SourceSet::paths_and_glob(&self.paths, pattern),
            (None, Some(name)) => SourceSet::paths_and_name(&self.paths, name),
            (None, None) => SourceSet::paths_and_name(&self.paths, &options.default_name),
        };
        info!(sources = set.len(), "resolved config sources");

        let mut builder = PitBuilder::new(set).options(options);
        if let Some(base) = &self.base {
            builder = builder.base(load_base(base)?);
        }
        Ok(builder)
    }
}

/// Base defaults are read once; a missing base file is an error here,
/// unlike a missing source.
fn load_base(path: &Path) -> Result<Settings> {
    FileSource::at(path).load().map_err(|e| match e {
        PitError::SourceNotFound { name } => {
            PitError::Config(format!("base file not found: {name}"))
        }
        other => other,
    })
}

fn render(view: &MergedView, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(view)?),
        OutputFormat::Yaml => serde_yaml::to_string(&view.settings)
            .map(|body| format!("# generation {}\n{body}", view.generation))
            .map_err(|e| PitError::Config(format!("cannot render as yaml: {e}"))),
        OutputFormat::Toml => toml::to_string_pretty(&view.settings)
            .map(|body| format!("# generation {}\n{body}", view.generation))
            .map_err(|e| PitError::Config(format!("cannot render as toml: {e}"))),
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Resolve log level: --verbose > --quiet > --log-level > default
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or("info")
        };

        if self.json_logs {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
                )
                .json()
                .with_target(true)
                .with_writer(std::io::stderr)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
                )
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }

        match self.command {
            Commands::Watch { sources } => cmd_watch(sources).await,
            Commands::Show { sources } => cmd_show(sources).await,
        }
    }
}

async fn cmd_watch(args: SourceArgs) -> Result<()> {
    let options = args.options()?;
    let mut streams = args.builder(options)?.spawn()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            view = streams.views.recv() => match view {
                Some(view) => println!("{}", render(&view, args.format)?),
                None => break,
            },
            Some(err) = streams.errors.recv() => {
                error!(error = %err, "config error");
            }
        }
    }

    streams.handle.shutdown().await;
    Ok(())
}

async fn cmd_show(args: SourceArgs) -> Result<()> {
    let mut options = args.options()?;
    options.watch_files = false;
    options.watch_remote = false;
    let mut streams = args.builder(options)?.spawn()?;

    let view = streams.views.recv().await;
    streams.handle.shutdown().await;
    while let Some(err) = streams.errors.recv().await {
        error!(error = %err, "config error");
    }

    match view {
        Some(view) => {
            println!("{}", render(&view, args.format)?);
            Ok(())
        }
        None => Err(PitError::Config("config pit closed before publishing".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view() -> MergedView {
        MergedView::new(2, json!({"server": {"port": 80}}).as_object().cloned().unwrap())
    }

    #[test]
    fn test_cli_parses_watch_with_glob() {
        let cli = Cli::try_parse_from([
            "confpit", "watch", "-p", "/etc/app", "-p", "./conf", "--glob", "*.yaml", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Watch { sources } => {
                assert_eq!(sources.paths.len(), 2);
                assert_eq!(sources.glob.as_deref(), Some("*.yaml"));
            }
            Commands::Show { .. } => panic!("expected watch"),
        }
    }

    #[test]
    fn test_name_and_glob_conflict() {
        let result = Cli::try_parse_from([
            "confpit", "show", "-p", ".", "--name", "app", "--glob", "*.yaml",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_path_is_required() {
        assert!(Cli::try_parse_from(["confpit", "show"]).is_err());
    }

    #[test]
    fn test_render_formats() {
        let json = render(&view(), OutputFormat::Json).unwrap();
        assert!(json.contains("\"generation\": 2"));
        let yaml = render(&view(), OutputFormat::Yaml).unwrap();
        assert!(yaml.starts_with("# generation 2\n"));
        assert!(yaml.contains("port: 80"));
        let toml = render(&view(), OutputFormat::Toml).unwrap();
        assert!(toml.contains("[server]"));
    }

    #[test]
    fn test_missing_base_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_base(&dir.path().join("defaults.yaml")).unwrap_err();
        assert!(matches!(err, PitError::Config(_)));
    }

    #[test]
    fn test_base_file_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defaults.toml");
        std::fs::write(&path, "Port = 80\n").unwrap();
        let base = load_base(&path).unwrap();
        assert_eq!(base["port"], json!(80));
    }
}
