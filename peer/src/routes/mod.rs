//! HTTP route definitions.

mod health;
mod link;
mod status;
mod workouts;

pub use workouts::{ExerciseView, SetView, WorkoutView};

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(link::routes())
        .merge(status::routes())
        .merge(workouts::routes())
}
