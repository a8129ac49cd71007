//! Command-line tooling for extkit hosts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use extkit_core::sandbox::signature_path;
use extkit_core::{sign_plugin, ManagerConfig, Sandbox};

/// Set to `true` for JSON log lines.
const LOG_JSON_ENV: &str = "EXTKIT_LOG_JSON";

/// extkit - extension runtime tooling.
#[derive(Parser, Debug)]
#[command(name = "extkit")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write `<artifact>.sig` for a plugin artifact.
    Sign {
        #[arg(required = true)]
        artifact: PathBuf,
    },
    /// Run the sandbox checks a hot load would run.
    Verify {
        #[arg(required = true)]
        artifact: PathBuf,
        /// Where the artifact came from.
        #[arg(short, long, default_value = "")]
        source: String,
        /// Configuration file (TOML).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON.
    Config {
        /// Configuration file (TOML).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Sign { artifact } => run_sign(&artifact),
        Command::Verify {
            artifact,
            source,
            config,
        } => run_verify(&artifact, &source, config.as_deref()),
        Command::Config { config } => run_config(config.as_deref()),
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "extkit=debug" } else { "extkit=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

/// Config from `path` (or defaults), then environment overrides.
fn load_config(path: Option<&Path>) -> Result<ManagerConfig> {
    let mut config = match path {
        Some(path) => ManagerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ManagerConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    Ok(config)
}

fn run_sign(artifact: &Path) -> Result<()> {
    let digest = sign_plugin(artifact)
        .with_context(|| format!("Failed to sign {}", artifact.display()))?;
    println!("{}  {}", digest, signature_path(artifact).display());
    Ok(())
}

fn run_verify(artifact: &Path, source: &str, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let resolved = Sandbox::new(config.security)
        .validate(artifact, source)
        .with_context(|| format!("{} rejected", artifact.display()))?;
    println!("ok  {}", resolved.display());
    Ok(())
}

fn run_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_verify() {
        let args = Args::parse_from([
            "extkit",
            "verify",
            "/opt/plugins/libtask.so",
            "--source",
            "registry.internal",
        ]);
        match args.command {
            Command::Verify {
                artifact,
                source,
                config,
            } => {
                assert_eq!(artifact, PathBuf::from("/opt/plugins/libtask.so"));
                assert_eq!(source, "registry.internal");
                assert!(config.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_sign_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("libtask.so");
        std::fs::write(&artifact, b"task plugin").unwrap();

        let config_path = dir.path().join("extkit.toml");
        std::fs::write(
            &config_path,
            format!(
                "[security]\nallowed_paths = [{:?}]\n",
                dir.path().display().to_string()
            ),
        )
        .unwrap();

        assert!(run_verify(&artifact, "", Some(&config_path)).is_err());
        run_sign(&artifact).unwrap();
        run_verify(&artifact, "", Some(&config_path)).unwrap();
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_config(Some(Path::new("/nonexistent/extkit.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/extkit.toml"));
    }
}
