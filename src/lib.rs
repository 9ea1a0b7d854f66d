#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod core;
pub mod engine;
mod error;
mod io;
mod manifest;
pub mod pipeline;
pub mod steps;
mod tool;
mod utils;

pub use crate::config::*;
pub use crate::core::{Env, Options, Project, RUNTIME_TOKEN_VAR, SIGN_IDENTITY_VAR};
pub use crate::engine::{Blueprint, Diagnostics, Phase, Step, TaskGraph};
pub use crate::error::*;
pub use crate::manifest::PackageManifest;
pub use crate::tool::{ToolCommand, ToolOutput};

#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
