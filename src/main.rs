//! Strata CLI
//!
//! Usage:
//!   strata [OPTIONS] <TEMPLATE>
//!
//! Options:
//!   -c, --config <FILE>    Engine configuration (TOML format)
//!   -I, --path <DIR>       Add a template search path (repeatable)
//!   --var <KEY=VALUE>      Bind a variable; VALUE is JSON or a plain string
//!   --cache-dir <DIR>      Cache rendered output in DIR
//!   --ttl <SECS>           Cache ttl in seconds
//!   --no-globals           Do not bind configured globals
//!   --markdown             Enable Markdown blocks
//!   -v, --verbose          Debug logging
//!   -h, --help             Print help

use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use strata::{Engine, EngineConfig, Variables};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Render block-inheritance templates")]
struct Cli {
    /// Template name, resolved against the search paths
    template: String,

    /// Engine configuration (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Template search path (repeatable)
    #[arg(short = 'I', long = "path")]
    paths: Vec<PathBuf>,

    /// Variable binding KEY=VALUE; VALUE is parsed as JSON, else taken as a string
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, Value)>,

    /// Cache rendered output in this directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Cache ttl in seconds
    #[arg(long)]
    ttl: Option<u64>,

    /// Do not bind configured global variables
    #[arg(long)]
    no_globals: bool,

    /// Enable Markdown blocks
    #[arg(long)]
    markdown: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_var(arg: &str) -> Result<(String, Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", arg))?;
    if key.is_empty() {
        return Err(format!("missing variable name in '{}'", arg));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => match EngineConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };

    // Command line flags win over the config file
    config.paths.extend(cli.paths);
    if let Some(dir) = cli.cache_dir {
        config.cache.dir = Some(dir);
    }
    if let Some(ttl) = cli.ttl {
        config.cache.ttl = ttl;
    }
    if cli.markdown {
        config.markdown = true;
    }

    let engine = match Engine::from_config(&config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let vars: Variables = cli.vars.into_iter().collect();
    match engine.render(&cli.template, vars, &[], !cli.no_globals) {
        Ok(output) => {
            print!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {}", e.report());
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_var_json_or_string() {
        assert_eq!(parse_var("n=3").unwrap(), ("n".to_string(), json!(3)));
        assert_eq!(
            parse_var("user={\"name\":\"ada\"}").unwrap().1,
            json!({"name": "ada"})
        );
        assert_eq!(parse_var("title=Hello").unwrap().1, json!("Hello"));
        assert_eq!(parse_var("eq=a=b").unwrap().1, json!("a=b"));
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }
}
