//! Command line interface definition

use crate::error::CliError;
use clap::{ArgAction, Args, Parser, Subcommand};
use kiln_args::{Fragment, Value};
use kiln_types::Triple;
use std::path::PathBuf;

/// kiln - reproducible source builds from declarative recipes
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reproducible source builds from declarative recipes")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Args)]
pub struct GlobalArgs {
    /// Emit logs and results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding recipe files
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        env = "KILN_RECIPES",
        default_value = "recipes"
    )]
    pub recipes: PathBuf,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build a recipe and print its output directory
    #[command(alias = "b")]
    Build(BuildArgs),

    /// Build a recipe, then run its assertions against the output
    Check(BuildArgs),

    /// Fetch and verify a recipe's source
    Fetch {
        /// Recipe name
        recipe: String,
    },

    /// Print the resolved build/host/target triples
    Triple {
        #[command(flatten)]
        triples: TripleArgs,

        /// Rotate one cross stage down: the host becomes the next build
        #[arg(long)]
        next_stage: bool,
    },
}

/// Explicit triples; omitted ones are resolved from the native machine
#[derive(Args, Clone, Default)]
pub struct TripleArgs {
    /// Machine the build runs on
    #[arg(long, value_name = "TRIPLE")]
    pub build: Option<Triple>,

    /// Machine the produced binaries run on
    #[arg(long, value_name = "TRIPLE")]
    pub host: Option<Triple>,

    /// Machine produced toolchains generate code for
    #[arg(long, value_name = "TRIPLE")]
    pub target: Option<Triple>,
}

#[derive(Args)]
pub struct BuildArgs {
    /// Recipe name
    pub recipe: String,

    #[command(flatten)]
    pub triples: TripleArgs,

    /// Set an argument: KEY is a dotted path, VALUE is JSON (bare words
    /// are strings). Objects carrying `$mutation` are mutations.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Read an argument fragment from a YAML or JSON file
    #[arg(long = "args", value_name = "FILE")]
    pub args_files: Vec<PathBuf>,

    /// Run the check phase
    #[arg(long)]
    pub check: bool,

    /// Keep the work directory when a build fails
    #[arg(long)]
    pub keep_work: bool,
}

impl BuildArgs {
    /// Caller fragments in precedence order: files, then `--set`, then
    /// the dedicated flags
    ///
    /// # Errors
    ///
    /// Returns an error for unreadable files or malformed `--set` values.
    pub fn fragments(&self) -> Result<Vec<Fragment>, CliError> {
        let mut fragments = Vec::new();

        for path in &self.args_files {
            let text = std::fs::read_to_string(path).map_err(|e| {
                CliError::InvalidArguments(format!("cannot read {}: {e}", path.display()))
            })?;
            let value: Value = serde_yml::from_str(&text).map_err(|e| {
                CliError::InvalidArguments(format!("{}: {e}", path.display()))
            })?;
            fragments.push(Fragment::from_value(value).map_err(kiln_errors::Error::from)?);
        }

        if !self.set.is_empty() {
            let mut root = serde_json::Map::new();
            for assignment in &self.set {
                let (path, value) = parse_set(assignment)?;
                insert_dotted(&mut root, &path, value)?;
            }
            fragments
                .push(Fragment::from_value(Value::Object(root)).map_err(kiln_errors::Error::from)?);
        }

        let mut flags = Fragment::new();
        for (key, triple) in [
            ("build", &self.triples.build),
            ("host", &self.triples.host),
            ("target", &self.triples.target),
        ] {
            if let Some(triple) = triple {
                flags.insert(key, triple.to_string());
            }
        }
        if self.check {
            flags.insert("check", true);
        }
        if !flags.is_empty() {
            fragments.push(flags);
        }

        Ok(fragments)
    }
}

/// Split `KEY=VALUE`, reading VALUE as JSON and falling back to a string
pub fn parse_set(assignment: &str) -> Result<(String, Value), CliError> {
    let Some((key, raw)) = assignment.split_once('=') else {
        return Err(CliError::InvalidArguments(format!(
            "expected KEY=VALUE, got {assignment:?}"
        )));
    };
    let key = key.trim();
    if key.is_empty() || key.split('.').any(str::is_empty) {
        return Err(CliError::InvalidArguments(format!(
            "invalid argument path {key:?}"
        )));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn insert_dotted(
    root: &mut serde_json::Map<String, Value>,
    path: &str,
    value: Value,
) -> Result<(), CliError> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().unwrap_or(path);
    let mut node = root;
    for segment in segments {
        let slot = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        node = match slot {
            Value::Object(map) if !map.contains_key("$mutation") => map,
            _ => {
                return Err(CliError::InvalidArguments(format!(
                    "--set {path} descends into a value set earlier"
                )))
            }
        };
    }
    if node.insert(last.to_string(), value).is_some() {
        return Err(CliError::InvalidArguments(format!("--set {path} given twice")));
    }
    Ok(())
}
