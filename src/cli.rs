//! Command-line surface over JSON scenario files.
//!
//! Every subcommand reads one JSON document and returns one JSON value,
//! which the binary prints on stdout. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::anomaly::DetectorConfig;
use crate::auto_apply::{AutoApplyConfig, AutoApplyGate, AutoApplyResult};
use crate::config::Config;
use crate::confidence::InMemoryCalibrationStore;
use crate::domain::{DailyMetrics, EntitySnapshot, OrgPolicy};
use crate::error::{AppError, AppResult, EngineError};
use crate::evaluation::{evaluate_recommendation, EvaluationInput};
use crate::forecast::{generate_forecast, run_what_if_simulation, ForecastParams, WhatIfParams};
use crate::guardrails::{check_all_guardrails, GuardrailContext, GuardrailEngine};
use crate::orchestrator::{builtin_registry, ControllerAgent, ControllerInput, ControllerOutput};
use crate::planner::{create_reasoning_plan, ReasoningContext};
use crate::storage::InMemoryStore;

/// Ad decision engine command line.
#[derive(Debug, Parser)]
#[command(name = "ad-decision-engine", version, about)]
pub struct Cli {
    /// Print compact instead of pretty JSON
    #[arg(long, global = true)]
    pub compact: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands. Each takes the path of a JSON input file.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Choose a reasoning depth for a `ReasoningContext`
    Plan {
        /// Input file
        file: PathBuf,
    },
    /// Run the full controller over a `Scenario`
    Run {
        /// Input file
        file: PathBuf,
    },
    /// Check a `GuardrailContext` against every rule
    Guardrails {
        /// Input file
        file: PathBuf,
    },
    /// Project metrics from `ForecastParams`
    Forecast {
        /// Input file
        file: PathBuf,
    },
    /// Simulate interventions from `WhatIfParams`
    WhatIf {
        /// Input file
        file: PathBuf,
    },
    /// Grade an applied recommendation from an `EvaluationInput`
    Evaluate {
        /// Input file
        file: PathBuf,
    },
}

/// Everything `run` needs: the entity's data, the request and the planning profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Planning profile
    #[serde(default)]
    pub context: ReasoningContext,
    /// Request handed to the controller
    pub input: ControllerInput,
    /// Entity snapshot to seed
    pub entity: EntitySnapshot,
    /// Daily rows to seed
    #[serde(default)]
    pub history: Vec<DailyMetrics>,
    /// Organization policy to seed
    #[serde(default)]
    pub policy: Option<OrgPolicy>,
    /// Overrides the environment's auto-apply settings
    #[serde(default)]
    pub auto_apply: Option<AutoApplyConfig>,
}

/// Output of `run`.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Controller output
    pub output: ControllerOutput,
    /// Gate verdict per recommendation, in ranking order
    pub auto_apply: Vec<AutoApplyResult>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> AppResult<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| AppError::Internal {
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;
    let value = serde_json::from_str(&raw).map_err(EngineError::from)?;
    Ok(value)
}

fn to_json<T: Serialize>(value: &T) -> AppResult<serde_json::Value> {
    Ok(serde_json::to_value(value).map_err(EngineError::from)?)
}

/// Run a scenario end to end against an in-memory store.
pub async fn run_scenario(scenario: Scenario, config: &Config) -> ScenarioReport {
    let store = InMemoryStore::new();
    store.put_entity(scenario.entity).await;
    store
        .put_daily_metrics(&scenario.input.entity_id, scenario.history)
        .await;
    if let Some(policy) = scenario.policy {
        store.put_policy(policy).await;
    }

    let shared = Arc::new(store);
    let registry = builtin_registry(
        shared.clone(),
        shared.clone(),
        DetectorConfig::default(),
        GuardrailEngine::default(),
    );
    let controller = ControllerAgent::new(registry, config.orchestrator.clone(), shared.clone());
    let output = controller.process(scenario.input, &scenario.context).await;

    let gate = AutoApplyGate::new(
        scenario.auto_apply.unwrap_or_else(|| config.auto_apply.clone()),
        Arc::new(InMemoryCalibrationStore::new()),
        shared,
    );
    let mut auto_apply = Vec::new();
    for recommendation in output.recommendations.iter().flatten() {
        auto_apply.push(gate.evaluate(recommendation).await);
    }

    ScenarioReport { output, auto_apply }
}

/// Execute a subcommand and return its JSON result.
pub async fn execute(command: &Command, config: &Config) -> AppResult<serde_json::Value> {
    match command {
        Command::Plan { file } => {
            let context: ReasoningContext = read_json(file)?;
            to_json(&create_reasoning_plan(&context))
        }
        Command::Run { file } => {
            let scenario: Scenario = read_json(file)?;
            info!(entity_id = %scenario.input.entity_id, "Running scenario");
            to_json(&run_scenario(scenario, config).await)
        }
        Command::Guardrails { file } => {
            let ctx: GuardrailContext = read_json(file)?;
            to_json(&check_all_guardrails(ctx).await)
        }
        Command::Forecast { file } => {
            let params: ForecastParams = read_json(file)?;
            to_json(&generate_forecast(&params))
        }
        Command::WhatIf { file } => {
            let params: WhatIfParams = read_json(file)?;
            to_json(&run_what_if_simulation(&params))
        }
        Command::Evaluate { file } => {
            let input: EvaluationInput = read_json(file)?;
            to_json(&evaluate_recommendation(&input))
        }
    }
}
