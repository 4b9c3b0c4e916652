#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Recipe building for kiln
//!
//! Turns a recipe plus caller argument fragments into an immutable output
//! directory: arguments are merged with the mutation algebra, triples are
//! rotated, dependencies are built once per session, the source is fetched
//! and verified, and the phases run in order in a scoped work directory.

pub mod assert;
mod build_systems;
mod builder;
pub mod cross;
pub mod environment;
pub mod recipe;
pub mod stages;

pub use assert::{check_output, AssertReport, AssertResult, AssertSpec, BinaryCheck, Expectation, Provides};
pub use build_systems::{
    AutotoolsBuildSystem, BuildSystem, BuildSystemContext, BuildSystemRegistry, CMakeBuildSystem,
    CargoBuildSystem, CustomBuildSystem, GoBuildSystem,
};
pub use builder::{merge_build_args, BuildOutput, Builder};
pub use cross::{rotate, rotate_from, RotateArgs, Triples};
pub use environment::{compose, Environment, EnvironmentFragment, Tier};
pub use recipe::{parse_recipe, parse_recipe_file, DependencyDecl, DependencyKind, Recipe, RecipeBook};
pub use stages::{
    CommandOutput, CommandRequest, CommandRunner, CommandSpec, Invocation, PhaseOverride,
    PhasePlan, ProcessRunner,
};
