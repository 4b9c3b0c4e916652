//! Build orchestration
//!
//! A [`Builder`] is one build session. Every `(recipe, arguments)` pair is
//! built at most once per session: requests for the same pair, including
//! concurrent ones from sibling dependencies, share a single task.

use crate::assert::{check_output, AssertReport};
use crate::build_systems::{BuildSystemContext, BuildSystemRegistry};
use crate::cross::{rotate_from, RotateArgs, Triples};
use crate::environment::{compose, dependency_fragment, EnvironmentFragment, Tier};
use crate::recipe::{Recipe, RecipeBook};
use crate::stages::{
    shell_quote, CommandRunner, Invocation, PhaseExecutor, PhaseOverride, PhasePlan,
    ProcessRunner, ResolvedPhase,
};
use dashmap::DashMap;
use futures::future::{try_join_all, BoxFuture};
use kiln_args::{Arg, Fragment, MergedConfig, Merger, Mutation, Schema, Value};
use kiln_config::Config;
use kiln_errors::{ArgsError, BuildError, Error};
use kiln_events::{AppEvent, BuildEvent, EventEmitter, EventSender, FailureContext};
use kiln_hash::Hash;
use kiln_net::{Fetched, Fetcher};
use kiln_store::{copy_tree, ArtifactStore, BuildCache, CacheEntry, CacheKey};
use kiln_types::{Phase, Triple};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::task::Poll;
use std::time::Instant;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Host variables passed through to phase commands
const HOST_PASSTHROUGH: &[&str] = &["PATH", "HOME", "TMPDIR", "LANG", "LC_ALL", "TZ"];

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Result of building one recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// `name@version`
    pub recipe: String,
    pub artifact: Hash,
    /// Immutable store directory holding the installed tree
    pub path: PathBuf,
    /// Served from the build cache without running any phase
    pub cached: bool,
    pub triples: Triples,
}

type TaskKey = (String, Hash);

/// Arguments pulled out of the fragments before merging
#[derive(Default)]
struct Extracted {
    env: Vec<EnvironmentFragment>,
    phase_env: BTreeMap<Phase, Vec<EnvironmentFragment>>,
    dependencies: BTreeMap<String, Vec<Fragment>>,
}

/// A recipe's fragments merged and split, keyed by what they resolve to
struct Prepared {
    merged: MergedConfig,
    extracted: Extracted,
    digest: Hash,
}

/// A build session
pub struct Builder {
    config: Config,
    book: Arc<RecipeBook>,
    fetcher: Arc<Fetcher>,
    cache: Arc<dyn BuildCache>,
    runner: Arc<dyn CommandRunner>,
    registry: Arc<BuildSystemRegistry>,
    events: Option<EventSender>,
    cancel: CancellationToken,
    native: Triple,
    tasks: DashMap<TaskKey, Arc<OnceCell<BuildOutput>>>,
}

impl EventEmitter for Builder {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }
}

impl Builder {
    /// Create a session that spawns real processes
    #[must_use]
    pub fn new(
        config: Config,
        book: RecipeBook,
        fetcher: Arc<Fetcher>,
        cache: Arc<dyn BuildCache>,
    ) -> Self {
        Self {
            config,
            book: Arc::new(book),
            fetcher,
            cache,
            runner: Arc::new(ProcessRunner::new()),
            registry: Arc::new(BuildSystemRegistry::new()),
            events: None,
            cancel: CancellationToken::new(),
            native: Triple::native(),
            tasks: DashMap::new(),
        }
    }

    /// Set the command runner
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: BuildSystemRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Set event sender for progress reporting
    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the triple omitted triples default to
    #[must_use]
    pub fn with_native(mut self, native: Triple) -> Self {
        self.native = native;
        self
    }

    #[must_use]
    pub fn book(&self) -> &RecipeBook {
        &self.book
    }

    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        self.fetcher.store()
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build a recipe with caller fragments merged after its defaults
    ///
    /// # Errors
    ///
    /// Structural errors (unknown recipe, dependency cycle, argument
    /// conflicts, unsupported host) are returned before any network or
    /// build work starts. Later failures carry the recipe and phase.
    pub async fn build(&self, name: &str, fragments: &[Fragment]) -> Result<BuildOutput, Error> {
        self.check_graph(name)?;
        self.resolve(name, fragments.to_vec()).await
    }

    /// Build a recipe, then run its assertions against the output
    ///
    /// # Errors
    ///
    /// Returns build errors, or `AssertionFailed` for the first failing check.
    pub async fn check(
        &self,
        name: &str,
        fragments: &[Fragment],
    ) -> Result<(BuildOutput, AssertReport), Error> {
        let output = self.build(name, fragments).await?;
        let recipe = self.book.get(name)?;
        let spec = recipe.assert_spec();
        let report = check_output(
            &output.recipe,
            &output.path,
            &spec,
            self.runner.as_ref(),
            &self.cancel,
            &self.events,
        )
        .await
        .and_then(AssertReport::into_result)
        .map_err(|e| e.in_recipe(&output.recipe))?;
        Ok((output, report))
    }

    /// Fetch and verify a recipe's source without building it
    ///
    /// # Errors
    ///
    /// Returns `MissingDependency` for an unknown recipe or any fetch error.
    pub async fn fetch_source(&self, name: &str) -> Result<Option<Fetched>, Error> {
        let recipe = self.book.get(name)?;
        match &recipe.source {
            Some(source) => self
                .fetcher
                .fetch(&source.spec, &self.events)
                .await
                .map(Some)
                .map_err(|e| e.in_recipe(recipe.identity())),
            None => Ok(None),
        }
    }

    /// Reject unknown recipes and dependency cycles before building
    fn check_graph(&self, name: &str) -> Result<(), Error> {
        fn visit(
            book: &RecipeBook,
            name: &str,
            path: &mut Vec<String>,
            done: &mut HashSet<String>,
        ) -> Result<(), Error> {
            if done.contains(name) {
                return Ok(());
            }
            if let Some(start) = path.iter().position(|n| n == name) {
                let mut cycle = path[start..].to_vec();
                cycle.push(name.to_string());
                return Err(BuildError::DependencyCycle { cycle }.into());
            }
            let recipe = book.get(name)?;
            path.push(name.to_string());
            for dependency in &recipe.dependencies {
                visit(book, dependency.recipe(), path, done)
                    .map_err(|e| attribute_missing(e, &recipe))?;
            }
            path.pop();
            done.insert(name.to_string());
            Ok(())
        }

        visit(&self.book, name, &mut Vec::new(), &mut HashSet::new())
    }

    fn resolve(&self, name: &str, fragments: Vec<Fragment>) -> BoxFuture<'_, Result<BuildOutput, Error>> {
        let name = name.to_string();
        Box::pin(async move {
            let recipe = self.book.get(&name)?;
            let prepared = prepare(&recipe, fragments).map_err(|e| self.failed(&recipe, e))?;
            let key = (name, prepared.digest);
            let task = Arc::clone(self.tasks.entry(key).or_default().value());
            task.get_or_try_init(|| self.build_recipe(recipe, prepared))
                .await
                .cloned()
        })
    }

    async fn build_recipe(&self, recipe: Arc<Recipe>, prepared: Prepared) -> Result<BuildOutput, Error> {
        self.build_node(&recipe, prepared)
            .await
            .map_err(|e| self.failed(&recipe, e))
    }

    fn failed(&self, recipe: &Recipe, error: Error) -> Error {
        let identity = recipe.identity();
        self.emit(AppEvent::Build(BuildEvent::Failed {
            recipe: identity.clone(),
            phase: error.phase().map(str::to_string),
            failure: FailureContext::from_error(&error),
        }));
        error.in_recipe(identity)
    }

    #[allow(clippy::too_many_lines)]
    async fn build_node(&self, recipe: &Recipe, prepared: Prepared) -> Result<BuildOutput, Error> {
        let started = Instant::now();
        let identity = recipe.identity();
        let Prepared {
            merged,
            mut extracted,
            digest: args_digest,
        } = prepared;

        let triples = rotate_from(
            &RotateArgs {
                build: merged.get_typed("build")?,
                host: merged.get_typed("host")?,
                target: merged.get_typed("target")?,
            },
            &self.native,
        );
        triples.check_host(&recipe.metadata.hosts)?;

        let run_check = merged
            .get_typed::<bool>("check")?
            .unwrap_or(self.config.build.run_checks);
        let plan = PhasePlan::from_config(&merged, run_check)?;

        // Dependencies are rotated by kind; independent ones build concurrently
        let dependencies = try_join_all(recipe.dependencies.iter().map(|decl| {
            let stage = triples.for_dependency(decl.kind());
            self.emit_debug(format!(
                "{identity}: {} ({:?}) builds on {} for {}",
                decl.name(),
                decl.kind(),
                stage.build,
                stage.host
            ));
            let mut fragments = vec![triples_fragment(&stage)];
            fragments.extend(extracted.dependencies.remove(decl.name()).unwrap_or_default());
            self.resolve(decl.recipe(), fragments)
        }))
        .await?;
        for (decl, output) in recipe.dependencies.iter().zip(&dependencies) {
            self.emit(AppEvent::Build(BuildEvent::DependencyReady {
                recipe: identity.clone(),
                dependency: decl.name().to_string(),
                artifact: output.artifact.to_hex(),
            }));
        }

        let patches = read_patches(recipe).await?;

        let source = match &recipe.source {
            Some(source) => Some(self.fetcher.fetch(&source.spec, &self.events).await?),
            None => None,
        };

        let key = CacheKey {
            recipe: identity.clone(),
            config: config_digest(ConfigInputs {
                args: args_digest,
                triples: &triples,
                dependencies: &dependencies,
                patches: &patches,
                recipe,
                run_check,
            }),
            checksum: source.as_ref().map(|s| s.checksum.to_string()),
        };
        let key_hex = key.digest().to_hex();
        self.emit(AppEvent::Build(BuildEvent::Started {
            recipe: identity.clone(),
            version: recipe.metadata.version.clone(),
            key: key_hex.clone(),
            build: triples.build.to_string(),
            host: triples.host.to_string(),
            target: triples.target.to_string(),
        }));

        let _guard = {
            let mut lock = self.cache.lock(&key);
            match futures::poll!(&mut lock) {
                Poll::Ready(guard) => guard?,
                Poll::Pending => {
                    self.emit(AppEvent::Build(BuildEvent::LockWaiting {
                        recipe: identity.clone(),
                        key: key_hex.clone(),
                    }));
                    lock.await?
                }
            }
        };

        let store = self.fetcher.store();
        if let Some(entry) = self.cache.get(&key).await? {
            if store.contains(&entry.artifact).await {
                self.emit(AppEvent::Build(BuildEvent::CacheHit {
                    recipe: identity.clone(),
                    key: key_hex,
                    artifact: entry.artifact.to_hex(),
                }));
                return Ok(BuildOutput {
                    recipe: identity,
                    artifact: entry.artifact,
                    path: store.artifact_path(&entry.artifact),
                    cached: true,
                    triples,
                });
            }
        }

        let staging = store.staging_dir(&recipe.metadata.name)?;
        let work = staging.path().join("work");
        let out = staging.path().join("out");
        match &source {
            Some(fetched) => copy_tree(&fetched.path, &work).await?,
            None => create_dir(&work).await?,
        }
        create_dir(&out).await?;

        let system = self.registry.select(recipe.build_system, &work).await?;
        let ctx = BuildSystemContext {
            source_dir: &work,
            output_dir: &out,
            triples: &triples,
            jobs: self.config.jobs(),
        };

        let mut base = vec![host_environment(&out, &triples)];
        base.extend(system.environment(&ctx));
        for (decl, output) in recipe.dependencies.iter().zip(&dependencies) {
            let runs_on_build = output.triples.host == triples.build;
            base.push(dependency_fragment(decl.name(), &output.path, decl.kind(), runs_on_build).await);
        }
        base.extend(extracted.env);

        let executor = PhaseExecutor::new(&identity, self.runner.as_ref(), &self.cancel)
            .with_events(self.events.clone());
        for (phase, reason) in &plan.skipped {
            executor.skip(*phase, reason);
        }

        let mut resolved = Vec::with_capacity(plan.phases.len());
        for planned in plan.phases {
            let default = if planned.phase == Phase::Patch {
                patch_invocation(&patches)
            } else {
                system.default_command(planned.phase, &ctx).await?
            };
            let invocation = match (planned.action, default) {
                (PhaseOverride::UseDefault, Some(default)) => default,
                (PhaseOverride::UseDefault, None) => {
                    executor.skip(planned.phase, &format!("no default command for {}", system.name()));
                    continue;
                }
                (PhaseOverride::AppendArgs(args), Some(default)) => default.with_args(&args),
                (PhaseOverride::AppendArgs(_), None) => {
                    return Err(BuildError::RecipeError {
                        message: format!(
                            "phase {} appends arguments but {} has no default command for it",
                            planned.phase,
                            system.name()
                        ),
                    }
                    .into())
                }
                (PhaseOverride::ReplaceCommand { command, args }, _) => {
                    command.into_invocation()?.with_args(&args)
                }
            };

            let mut fragments = base.clone();
            if let Some(env) = &planned.env {
                fragments.push(EnvironmentFragment::from_fragment(
                    format!("phases.{}.env", planned.phase),
                    Tier::User,
                    env,
                )?);
            }
            fragments.extend(extracted.phase_env.remove(&planned.phase).unwrap_or_default());
            resolved.push(ResolvedPhase {
                phase: planned.phase,
                invocation,
                env: compose(&fragments)?,
            });
        }

        if let Err(e) = executor.run(&resolved, &work).await {
            if self.config.build.keep_failed_work {
                let kept = staging.keep();
                self.emit_warning_with_context(
                    format!("kept work directory for {identity}"),
                    kept.display().to_string(),
                );
            }
            return Err(e);
        }

        let stored = store.insert_tree(&out).await?;
        let kept = self.cache.put(CacheEntry::new(key, stored.hash)).await?;
        let path = store.artifact_path(&kept.artifact);

        self.emit(AppEvent::Build(BuildEvent::Completed {
            recipe: identity.clone(),
            artifact: kept.artifact.to_hex(),
            path: path.clone(),
            duration: started.elapsed(),
        }));

        Ok(BuildOutput {
            recipe: identity,
            artifact: kept.artifact,
            path,
            cached: false,
            triples,
        })
    }
}

/// Merge build arguments over a seed holding every canonical phase
///
/// # Errors
///
/// Returns `ArgumentConflict` when one fragment replaces `phases` (or a
/// single phase) and another patches it, or any mutation error.
pub fn merge_build_args(fragments: &[Fragment]) -> Result<MergedConfig, Error> {
    let phases = Phase::CANONICAL
        .iter()
        .map(|phase| (phase.to_string(), Value::Object(serde_json::Map::new())))
        .collect();
    let mut base = serde_json::Map::new();
    base.insert("phases".to_string(), Value::Object(phases));

    Merger::new(Schema::new().exclusive("phases").exclusive("phases.*"))
        .with_base(base)
        .merge(fragments)
}

/// Merge a recipe's defaults with caller fragments
///
/// `env`, `phases.*.env` and `dependencies` are split out before merging
/// since they compose differently. The digest covers only what the
/// fragments resolve to, so fragments that change nothing leave it as is.
fn prepare(recipe: &Recipe, fragments: Vec<Fragment>) -> Result<Prepared, Error> {
    let identity = recipe.identity();
    let mut all = Vec::with_capacity(fragments.len() + 1);
    all.push(recipe.args.clone());
    all.extend(fragments);

    let mut extracted = Extracted::default();
    for (index, fragment) in all.iter_mut().enumerate() {
        extract(fragment, &format!("{identity} args[{index}]"), &mut extracted)?;
    }
    for name in extracted.dependencies.keys() {
        if !recipe.dependencies.iter().any(|d| d.name() == name) {
            return Err(BuildError::RecipeError {
                message: format!("arguments given for unknown dependency {name}"),
            }
            .into());
        }
    }

    let merged = merge_build_args(&all)?;
    let digest = args_digest(&merged, &extracted);
    Ok(Prepared {
        merged,
        extracted,
        digest,
    })
}

fn args_digest(merged: &MergedConfig, extracted: &Extracted) -> Hash {
    let chains = |fragments: &[EnvironmentFragment]| {
        fragments
            .iter()
            .cloned()
            .fold(EnvironmentFragment::default(), EnvironmentFragment::then)
            .canonical()
    };
    let phase_env: serde_json::Map<String, Value> = extracted
        .phase_env
        .iter()
        .map(|(phase, fragments)| (phase.to_string(), chains(fragments.as_slice())))
        .filter(|(_, env)| env.as_object().is_some_and(|vars| !vars.is_empty()))
        .collect();
    let dependencies: serde_json::Map<String, Value> = extracted
        .dependencies
        .iter()
        .map(|(name, fragments)| {
            let args: Vec<Value> = fragments
                .iter()
                .filter(|f| !f.is_empty())
                .map(Fragment::to_value)
                .collect();
            (name.clone(), Value::Array(args))
        })
        .filter(|(_, args)| args.as_array().is_some_and(|a| !a.is_empty()))
        .collect();

    let split = serde_json::json!({
        "env": chains(extracted.env.as_slice()),
        "phase_env": phase_env,
        "dependencies": dependencies,
    })
    .to_string();
    let merged = merged.digest();
    Hash::from_parts([merged.as_bytes().as_slice(), split.as_bytes()])
}

/// Move `env`, `phases.*.env` and `dependencies` out of a fragment
fn extract(fragment: &mut Fragment, source: &str, into: &mut Extracted) -> Result<(), Error> {
    if let Some(env) = fragment.remove("env") {
        into.env.push(env_fragment(source, "env", env)?);
    }

    match fragment.remove("phases") {
        Some(Arg::Object(mut phases)) => {
            for phase in Phase::CANONICAL {
                match phases.remove(phase.as_str()) {
                    Some(Arg::Object(mut entry)) => {
                        if let Some(env) = entry.remove("env") {
                            let scope = format!("phases.{phase}.env");
                            into.phase_env
                                .entry(phase)
                                .or_default()
                                .push(env_fragment(source, &scope, env)?);
                        }
                        phases.insert(phase.as_str(), entry);
                    }
                    Some(other) => phases.insert(phase.as_str(), other),
                    None => {}
                }
            }
            fragment.insert("phases", phases);
        }
        Some(other) => fragment.insert("phases", other),
        None => {}
    }

    match fragment.remove("dependencies") {
        None => {}
        Some(Arg::Object(overrides)) => {
            for (name, arg) in overrides.iter() {
                let Arg::Object(args) = arg else {
                    return Err(ArgsError::InvalidFragment {
                        message: format!("{source}: dependencies.{name} must be an object"),
                    }
                    .into());
                };
                into.dependencies
                    .entry(name.clone())
                    .or_default()
                    .push(args.clone());
            }
        }
        Some(_) => {
            return Err(ArgsError::InvalidFragment {
                message: format!("{source}: dependencies must be an object"),
            }
            .into())
        }
    }
    Ok(())
}

fn env_fragment(source: &str, scope: &str, arg: Arg) -> Result<EnvironmentFragment, Error> {
    match arg {
        Arg::Object(vars) => {
            EnvironmentFragment::from_fragment(format!("{source} {scope}"), Tier::User, &vars)
        }
        _ => Err(ArgsError::InvalidFragment {
            message: format!("{source}: {scope} must be an object of variables"),
        }
        .into()),
    }
}

fn triples_fragment(triples: &Triples) -> Fragment {
    Fragment::new()
        .with("build", triples.build.to_string())
        .with("host", triples.host.to_string())
        .with("target", triples.target.to_string())
}

fn attribute_missing(error: Error, parent: &Recipe) -> Error {
    match error {
        Error::Build(BuildError::MissingDependency { .. }) => error.in_recipe(parent.identity()),
        other => other,
    }
}

async fn read_patches(recipe: &Recipe) -> Result<Vec<(PathBuf, Hash)>, Error> {
    let mut patches = Vec::new();
    for path in recipe.patch_paths() {
        let path = std::path::absolute(&path)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| BuildError::RecipeError {
                message: format!("cannot read patch {}: {e}", path.display()),
            })?;
        patches.push((path, Hash::from_data(&bytes)));
    }
    Ok(patches)
}

fn patch_invocation(patches: &[(PathBuf, Hash)]) -> Option<Invocation> {
    if patches.is_empty() {
        return None;
    }
    let mut script = String::from("set -e\n");
    for (path, _) in patches {
        script.push_str("patch -p1 -i ");
        script.push_str(&shell_quote(&path.display().to_string()));
        script.push('\n');
    }
    Some(Invocation::Shell(script))
}

struct ConfigInputs<'a> {
    args: Hash,
    triples: &'a Triples,
    dependencies: &'a [BuildOutput],
    patches: &'a [(PathBuf, Hash)],
    recipe: &'a Recipe,
    run_check: bool,
}

/// Everything besides the source checksum that determines the output
fn config_digest(inputs: ConfigInputs<'_>) -> Hash {
    let triples = inputs.triples;
    let mut parts: Vec<Vec<u8>> = vec![
        inputs.args.as_bytes().to_vec(),
        triples.build.to_string().into_bytes(),
        triples.host.to_string().into_bytes(),
        triples.target.to_string().into_bytes(),
        inputs.recipe.build_system.to_string().into_bytes(),
        vec![u8::from(inputs.run_check)],
    ];
    for dependency in inputs.dependencies {
        parts.push(dependency.recipe.clone().into_bytes());
        parts.push(dependency.artifact.as_bytes().to_vec());
    }
    for (_, hash) in inputs.patches {
        parts.push(hash.as_bytes().to_vec());
    }
    Hash::from_parts(parts.iter().map(Vec::as_slice))
}

fn host_environment(output: &Path, triples: &Triples) -> EnvironmentFragment {
    let mut env = EnvironmentFragment::new("host", Tier::Base);
    for name in HOST_PASSTHROUGH {
        match std::env::var(name) {
            Ok(value) => env.push(name, Mutation::set(value)),
            Err(_) if *name == "PATH" => env.push(name, Mutation::set(FALLBACK_PATH)),
            Err(_) => {}
        }
    }
    env.with("OUTPUT", output.display().to_string())
        .with("KILN_BUILD", triples.build.to_string())
        .with("KILN_HOST", triples.host.to_string())
        .with("KILN_TARGET", triples.target.to_string())
}

async fn create_dir(path: &Path) -> Result<(), Error> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))
}
