//! # Ad Decision Engine
//!
//! Turns raw performance signals about an advertising entity into a vetted,
//! explainable, confidence-scored recommendation.
//!
//! ## Components
//!
//! - **Planner**: picks a reasoning depth and agent roster for a query
//! - **Orchestrator**: runs the roster in fixed waves, escalates, synthesizes
//! - **Confidence**: weighted factor scoring and bucket calibration
//! - **Anomaly detection**: seasonal baselines, severity tiers, creative fatigue
//! - **Forecasting**: regression or moving-average projections and what-if simulation
//! - **Evaluation**: before/after lift with a two-proportion z-test
//! - **Guardrails**: concurrent block/warn safety rules
//! - **Auto-apply**: the gate deciding whether a recommendation runs unattended
//!
//! ## Architecture
//!
//! ```text
//! ReasoningContext → Planner → ControllerAgent ─▶ agents ─▶ statistical components
//!                                   │                 └───▶ MetricsRepository / PolicyRepository
//!                                   ▼
//!                         ControllerOutput → AutoApplyGate → AuditSink
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ad_decision_engine::{
//!     anomaly::DetectorConfig, guardrails::GuardrailEngine, orchestrator::*,
//!     planner::ReasoningContext, storage::InMemoryStore, Config,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(InMemoryStore::new());
//!     let registry = builtin_registry(
//!         store.clone(),
//!         store.clone(),
//!         DetectorConfig::default(),
//!         GuardrailEngine::default(),
//!     );
//!     let controller = ControllerAgent::new(registry, config.orchestrator, store);
//!     let output = controller
//!         .process(ControllerInput::default(), &ReasoningContext::default())
//!         .await;
//!     println!("{}", serde_json::to_string_pretty(&output)?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Anomaly detection over daily metrics.
pub mod anomaly;
/// Auto-apply gate and daily counter.
pub mod auto_apply;
/// Command-line subcommands over JSON files.
pub mod cli;
/// Configuration management.
pub mod config;
/// Confidence scoring and calibration.
pub mod confidence;
/// Shared domain types: entities, metrics, actions, policies.
pub mod domain;
/// Error types and result aliases for the application.
pub mod error;
/// Grading of applied recommendations.
pub mod evaluation;
/// Forecasting and what-if simulation.
pub mod forecast;
/// Safety guardrails for proposed actions.
pub mod guardrails;
/// Controller, agents and run model.
pub mod orchestrator;
/// Reasoning depth planner.
pub mod planner;
/// Small statistics helpers shared by the estimators.
pub mod stats;
/// Collaborator contracts and the in-memory store.
pub mod storage;

pub use auto_apply::{should_auto_apply, AutoApplyConfig, AutoApplyGate, AutoApplyResult};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use orchestrator::{ControllerAgent, ControllerInput, ControllerOutput};
pub use planner::{create_reasoning_plan, determine_reasoning_depth, ReasoningContext, ReasoningPlan};
