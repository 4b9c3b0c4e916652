//! kiln - reproducible source builds from declarative recipes
//!
//! The CLI wires configuration, the artifact store, the fetcher and the
//! build cache into a build session, renders engine events as tracing
//! records, and prints command results on stdout.

mod cli;
mod error;
mod logging;

use crate::cli::{BuildArgs, Cli, Commands, TripleArgs};
use crate::error::CliError;
use clap::Parser;
use kiln_builder::{rotate, AssertReport, BuildOutput, Builder, ProcessRunner, RecipeBook, RotateArgs};
use kiln_config::Config;
use kiln_events::EventReceiver;
use kiln_net::{Fetched, Fetcher, NetClient, NetConfig};
use kiln_store::{ArtifactStore, FsBuildCache};
use serde_json::json;
use std::future::Future;
use std::process;
use std::sync::Arc;
use tokio::select;
use tracing::{error, info, warn};

const CACHE_DIR: &str = "cache";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    init_tracing(json_mode, cli.global.verbose);

    if let Err(e) = run(cli).await {
        error!("Application error: {}", e);
        if !json_mode {
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

/// Main application logic
async fn run(cli: Cli) -> Result<(), CliError> {
    info!("Starting kiln v{}", env!("CARGO_PKG_VERSION"));

    // Precedence: file (or defaults), then environment, then flags
    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;
    config.merge_env()?;

    let json = cli.global.json;
    match cli.command {
        Commands::Triple {
            triples,
            next_stage,
        } => {
            print_triples(&triples, next_stage, json);
            Ok(())
        }
        Commands::Build(args) => {
            if args.keep_work {
                config.build.keep_failed_work = true;
            }
            let fragments = args.fragments()?;
            let (builder, events) = open_session(config, &cli.global.recipes).await?;
            let output =
                with_events(events, async { builder.build(&args.recipe, &fragments).await }).await?;
            print_build(&output, json);
            Ok(())
        }
        Commands::Check(args) => {
            if args.keep_work {
                config.build.keep_failed_work = true;
            }
            check(config, &cli.global.recipes, &args, json).await
        }
        Commands::Fetch { recipe } => {
            let (builder, events) = open_session(config, &cli.global.recipes).await?;
            let fetched =
                with_events(events, async { builder.fetch_source(&recipe).await }).await?;
            print_fetch(&recipe, fetched.as_ref(), json);
            Ok(())
        }
    }
}

async fn check(
    config: Config,
    recipes: &std::path::Path,
    args: &BuildArgs,
    json: bool,
) -> Result<(), CliError> {
    let fragments = args.fragments()?;
    let (builder, events) = open_session(config, recipes).await?;
    let (output, report) =
        with_events(events, async { builder.check(&args.recipe, &fragments).await }).await?;
    print_build(&output, json);
    print_report(&report, json);
    Ok(())
}

/// Open the store, caches and recipe book, returning a session wired to
/// an event channel and to Ctrl-C
async fn open_session(
    config: Config,
    recipes: &std::path::Path,
) -> Result<(Builder, EventReceiver), CliError> {
    let store_root = config.store_path();
    let store = ArtifactStore::open(&store_root).await?;
    let cache = FsBuildCache::open(store_root.join(CACHE_DIR)).await?;
    let client = NetClient::new(&NetConfig::from(&config.network))?;
    let fetcher = Fetcher::new(client, config.network.clone(), store).await?;
    let book = RecipeBook::load_dir(recipes).await?;
    info!(recipes = book.len(), dir = %recipes.display(), "Loaded recipes");

    let (sender, receiver) = kiln_events::channel();
    let builder = Builder::new(config, book, Arc::new(fetcher), Arc::new(cache))
        .with_runner(Arc::new(ProcessRunner::new().with_events(sender.clone())))
        .with_events(sender);

    let cancel = builder.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling build");
            cancel.cancel();
        }
    });

    Ok((builder, receiver))
}

/// Drive `command` while logging events as they arrive
async fn with_events<T>(
    mut receiver: EventReceiver,
    command: impl Future<Output = Result<T, kiln_errors::Error>>,
) -> Result<T, CliError> {
    let mut command = Box::pin(command);
    loop {
        select! {
            result = &mut command => {
                while let Ok(message) = receiver.try_recv() {
                    logging::log_event_with_tracing(&message);
                }
                return result.map_err(CliError::from);
            }
            message = receiver.recv() => {
                if let Some(message) = message {
                    logging::log_event_with_tracing(&message);
                }
            }
        }
    }
}

fn print_triples(args: &TripleArgs, next_stage: bool, json: bool) {
    let mut triples = rotate(&RotateArgs {
        build: args.build.clone(),
        host: args.host.clone(),
        target: args.target.clone(),
    });
    if next_stage {
        triples = triples.next_stage();
    }
    if json {
        println!("{}", json!(triples));
    } else {
        println!("build:  {}", triples.build);
        println!("host:   {}", triples.host);
        println!("target: {}", triples.target);
    }
}

fn print_build(output: &BuildOutput, json: bool) {
    if json {
        println!(
            "{}",
            json!({
                "recipe": output.recipe,
                "artifact": output.artifact.to_hex(),
                "path": output.path,
                "cached": output.cached,
                "triples": output.triples,
            })
        );
    } else {
        println!("{}", output.path.display());
    }
}

fn print_fetch(recipe: &str, fetched: Option<&Fetched>, json: bool) {
    match (fetched, json) {
        (Some(fetched), true) => println!(
            "{}",
            json!({
                "recipe": recipe,
                "url": fetched.url,
                "checksum": fetched.checksum.to_string(),
                "path": fetched.path,
            })
        ),
        (Some(fetched), false) => println!("{}", fetched.path.display()),
        (None, true) => println!("{}", json!({ "recipe": recipe, "path": null })),
        (None, false) => eprintln!("{recipe} declares no source"),
    }
}

fn print_report(report: &AssertReport, json: bool) {
    for result in &report.results {
        if json {
            println!(
                "{}",
                json!({
                    "artifact": result.artifact,
                    "passed": result.passed,
                    "message": result.message,
                })
            );
        } else {
            let status = if result.passed { "ok" } else { "FAILED" };
            match &result.message {
                Some(message) => println!("{status:6} {} ({message})", result.artifact),
                None => println!("{status:6} {}", result.artifact),
            }
        }
    }
}

/// Install the tracing subscriber on stderr
///
/// `RUST_LOG` wins over `-v`; JSON mode switches the formatter so logs and
/// stdout results can both be machine read.
fn init_tracing(json_mode: bool, verbosity: u8) {
    let default = match verbosity {
        0 => "warn,kiln=info",
        1 => "info,kiln=debug,kiln_builder=debug",
        _ => "debug,kiln=trace,kiln_builder=trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    if json_mode {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_env_filter(filter)
            .init();
    }
}
