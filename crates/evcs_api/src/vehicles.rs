use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use evcs_core::{VehicleId, VehicleStatus};

use crate::{SharedEngine, engine_error_to_response, lock};

/// List a snapshot of every vehicle in the fleet
pub async fn list_vehicles(State(engine): State<SharedEngine>) -> Json<Vec<VehicleStatus>> {
    let engine = lock(&engine);
    Json(engine.vehicles())
}

/// Get a single vehicle's snapshot
pub async fn get_vehicle(
    State(engine): State<SharedEngine>,
    Path(vehicle_id): Path<String>,
) -> impl IntoResponse {
    let engine = lock(&engine);
    match engine.vehicle_status(&VehicleId::new(vehicle_id)) {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(error) => engine_error_to_response(error).into_response(),
    }
}
