use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use engine::{Blueprint, RunResult, Workflow};

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ExecuteBlueprintDto {
    pub blueprint: Blueprint,
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

pub async fn validate(Json(blueprint): Json<Blueprint>) -> Result<Json<Value>, ApiError> {
    let workflow = Workflow::from_blueprint(&blueprint)?;
    Ok(Json(json!({
        "valid": true,
        "blueprint_id": workflow.id,
        "levels": workflow.graph().get_level_nodes(),
    })))
}

pub async fn execute(
    State(state): State<AppState>,
    Json(payload): Json<ExecuteBlueprintDto>,
) -> Result<Json<RunResult>, ApiError> {
    let workflow = Workflow::from_blueprint(&payload.blueprint)?;
    let mut ctx = state.execution_context();
    let run = state.executor.run(&workflow, payload.inputs, &mut ctx).await?;
    info!("blueprint '{}' run {} success={}", workflow.id, run.run_id, run.success);
    Ok(Json(run))
}
