//! Batch LLM polling, change-stream job routing, and sentiment analysis
//! pipeline for brand-ranking prompts.
//!
//! This crate is a library of subsystems (scheduler, change router, batch
//! providers, entitlements) assembled by the binaries under `src/bin/`,
//! which differ only in which subsystems they run.

#![allow(clippy::too_many_arguments)]

pub mod app;
pub mod config;
pub mod db;
pub mod domain;
pub mod entitlements;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod model_catalog;
pub mod providers;
pub mod rate_limit;
pub mod router;
pub mod scheduler;
pub mod sentiment_prompt;

pub(crate) mod internals;

pub use app::Application;
pub use config::Settings;
pub use error::{CoreError, CoreResult};
