//! Local control API: the mutations a device's UI would make.
//!
//! Every edit runs inside the coordination task, is saved at the current
//! wall-clock time and pushed to the peer by the engine.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use repsync_engine::{Entity, EntityId, Progress, Store, Timestamp};
use serde::{Deserialize, Serialize};

use crate::coordinator::now_ms;
use crate::error::{AppError, Result};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetView {
    pub id: EntityId,
    pub order: i32,
    pub reps: i32,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseView {
    pub id: EntityId,
    pub order: i32,
    pub name: Option<String>,
    pub is_rest: bool,
    pub is_circuit: bool,
    pub has_circuit_rest: bool,
    pub rest: Option<f64>,
    pub sets: Vec<SetView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutView {
    pub id: EntityId,
    pub name: String,
    pub archived: bool,
    pub modified: Option<Timestamp>,
    pub exercises: Vec<ExerciseView>,
}

impl WorkoutView {
    fn build(store: &Store, id: &str) -> Option<Self> {
        let workout = store.workout(id)?;
        let exercises = store
            .exercises_of(id)
            .into_iter()
            .map(|exercise| ExerciseView {
                id: exercise.id().to_string(),
                order: exercise.order(),
                name: exercise.name.clone(),
                is_rest: exercise.is_rest(),
                is_circuit: exercise.is_circuit,
                has_circuit_rest: exercise.has_circuit_rest,
                rest: exercise.rest,
                sets: store
                    .sets_of(exercise.id())
                    .into_iter()
                    .map(|set| SetView {
                        id: set.id().to_string(),
                        order: set.order(),
                        reps: set.reps,
                        weight: set.weight,
                    })
                    .collect(),
            })
            .collect();

        Some(Self {
            id: workout.id().to_string(),
            name: workout.name.clone(),
            archived: workout.archived,
            modified: workout.stamps().modified,
            exercises,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkout {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkout {
    pub name: Option<String>,
    pub archived: Option<bool>,
}

/// Either a named exercise or a rest step.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddExercise {
    pub name: Option<String>,
    pub rest_seconds: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateExercise {
    pub name: Option<String>,
    pub rest: Option<f64>,
    pub is_circuit: Option<bool>,
    pub has_circuit_rest: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AddSet {
    pub reps: i32,
    pub weight: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSet {
    pub reps: Option<i32>,
    pub weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct MoveChild {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportProgress {
    pub exercise_index: u32,
    pub part_index: u32,
}

#[derive(Debug, Serialize)]
pub struct Created {
    pub id: EntityId,
}

#[derive(Debug, Serialize)]
pub struct Compacted {
    pub removed: usize,
}

/// Create workout routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/workouts", get(list_workouts).post(create_workout))
        .route(
            "/workouts/{id}",
            get(get_workout).patch(update_workout).delete(delete_workout),
        )
        .route("/workouts/{id}/exercises", post(add_exercise))
        .route("/workouts/{id}/exercises/move", post(move_exercise))
        .route("/workouts/{id}/compact", post(compact_workout))
        .route("/workouts/{id}/start", post(start_workout))
        .route(
            "/exercises/{id}",
            patch(update_exercise).delete(remove_exercise),
        )
        .route("/exercises/{id}/sets", post(add_set))
        .route("/exercises/{id}/sets/move", post(move_set))
        .route("/sets/{id}", patch(update_set).delete(remove_set))
        .route("/workout/progress", post(report_progress))
        .route("/workout/end", post(end_workout))
}

/// Run a local mutation through the engine's edit path.
async fn edit<T, F>(state: &AppState, mutate: F) -> Result<T>
where
    F: FnOnce(&mut Store) -> repsync_engine::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(state
        .coordinator
        .run(move |engine| engine.edit(now_ms(), mutate))
        .await??)
}

async fn list_workouts(State(state): State<AppState>) -> Result<Json<Vec<WorkoutView>>> {
    let workouts = state
        .coordinator
        .run(|engine| {
            let store = engine.store();
            store
                .workouts()
                .filter_map(|w| WorkoutView::build(store, w.id()))
                .collect::<Vec<_>>()
        })
        .await?;
    Ok(Json(workouts))
}

async fn get_workout(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> Result<Json<WorkoutView>> {
    let lookup = id.clone();
    let view = state
        .coordinator
        .run(move |engine| WorkoutView::build(engine.store(), &lookup))
        .await?;
    view.map(Json)
        .ok_or_else(|| AppError::NotFound(format!("workout {}", id)))
}

async fn create_workout(
    State(state): State<AppState>,
    Json(body): Json<CreateWorkout>,
) -> Result<(StatusCode, Json<Created>)> {
    let id = edit(&state, move |store| Ok(store.create_workout(body.name))).await?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn update_workout(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
    Json(body): Json<UpdateWorkout>,
) -> Result<StatusCode> {
    edit(&state, move |store| {
        store.edit_workout(&id, |workout| {
            if let Some(name) = body.name {
                workout.name = name;
            }
            if let Some(archived) = body.archived {
                workout.archived = archived;
            }
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_workout(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> Result<StatusCode> {
    edit(&state, move |store| store.delete_workout(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_exercise(
    State(state): State<AppState>,
    Path(workout_id): Path<EntityId>,
    Json(body): Json<AddExercise>,
) -> Result<(StatusCode, Json<Created>)> {
    let id = match (body.name, body.rest_seconds) {
        (Some(name), None) => {
            edit(&state, move |store| store.add_exercise(&workout_id, name)).await?
        }
        (None, Some(seconds)) => {
            edit(&state, move |store| store.add_rest(&workout_id, seconds)).await?
        }
        _ => {
            return Err(AppError::BadRequest(
                "exactly one of name or restSeconds is required".to_string(),
            ))
        }
    };
    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn move_exercise(
    State(state): State<AppState>,
    Path(workout_id): Path<EntityId>,
    Json(body): Json<MoveChild>,
) -> Result<StatusCode> {
    edit(&state, move |store| {
        store.move_exercise(&workout_id, body.from, body.to)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn compact_workout(
    State(state): State<AppState>,
    Path(workout_id): Path<EntityId>,
) -> Result<Json<Compacted>> {
    let report = edit(&state, move |store| store.compact_workout(&workout_id)).await?;
    Ok(Json(Compacted {
        removed: report.start.len() + report.end.len() + report.middle.len(),
    }))
}

async fn update_exercise(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
    Json(body): Json<UpdateExercise>,
) -> Result<StatusCode> {
    edit(&state, move |store| {
        store.edit_exercise(&id, |exercise| {
            if let Some(name) = body.name {
                exercise.name = Some(name);
            }
            if let Some(rest) = body.rest {
                exercise.rest = Some(rest);
            }
            if let Some(is_circuit) = body.is_circuit {
                exercise.is_circuit = is_circuit;
            }
            if let Some(has_circuit_rest) = body.has_circuit_rest {
                exercise.has_circuit_rest = has_circuit_rest;
            }
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_exercise(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> Result<StatusCode> {
    edit(&state, move |store| store.remove_exercise(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_set(
    State(state): State<AppState>,
    Path(exercise_id): Path<EntityId>,
    Json(body): Json<AddSet>,
) -> Result<(StatusCode, Json<Created>)> {
    let id = edit(&state, move |store| {
        store.add_set(&exercise_id, body.reps, body.weight)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn move_set(
    State(state): State<AppState>,
    Path(exercise_id): Path<EntityId>,
    Json(body): Json<MoveChild>,
) -> Result<StatusCode> {
    edit(&state, move |store| {
        store.move_set(&exercise_id, body.from, body.to)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_set(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
    Json(body): Json<UpdateSet>,
) -> Result<StatusCode> {
    edit(&state, move |store| {
        store.edit_set(&id, |set| {
            if let Some(reps) = body.reps {
                set.reps = reps;
            }
            if let Some(weight) = body.weight {
                set.weight = weight;
            }
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_set(State(state): State<AppState>, Path(id): Path<EntityId>) -> Result<StatusCode> {
    edit(&state, move |store| store.remove_set(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_workout(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> Result<StatusCode> {
    state
        .coordinator
        .run(move |engine| engine.start_workout(&id, now_ms()))
        .await??;
    Ok(StatusCode::NO_CONTENT)
}

async fn report_progress(
    State(state): State<AppState>,
    Json(body): Json<ReportProgress>,
) -> Result<StatusCode> {
    let progress = Progress {
        exercise_index: body.exercise_index,
        part_index: body.part_index,
        at: now_ms(),
    };
    state
        .coordinator
        .run(move |engine| engine.record_progress(progress))
        .await??;
    Ok(StatusCode::NO_CONTENT)
}

async fn end_workout(State(state): State<AppState>) -> Result<StatusCode> {
    state.coordinator.run(|engine| engine.end_workout()).await??;
    Ok(StatusCode::NO_CONTENT)
}
