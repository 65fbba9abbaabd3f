//! EVCS API Library
//!
//! HTTP surface for inspecting and stepping a charging protocol simulation.

mod simulation;
mod station;
mod vehicles;

use axum::{
    Json, Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use evcs_engine::{Engine, EngineError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tower_http::trace::TraceLayer;

pub use simulation::{AdvanceRequest, AdvanceResponse, EventsResponse};

pub type SharedEngine = Arc<Mutex<Engine>>;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}

fn lock(engine: &SharedEngine) -> MutexGuard<'_, Engine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

fn engine_error_to_response(error: EngineError) -> impl IntoResponse {
    let status = match &error {
        EngineError::UnknownVehicle(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidDuration(_) | EngineError::Config(_) => StatusCode::BAD_REQUEST,
        EngineError::Invariant { .. } | EngineError::Halted { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Create the application router with all endpoints
pub fn create_app(engine: Engine) -> Router {
    let shared_state = Arc::new(Mutex::new(engine));
    Router::new()
        .route("/health", get(health_check))
        .route("/scenario", get(simulation::get_scenario))
        .route("/station/status", get(station::get_station_status))
        .route("/vehicles", get(vehicles::list_vehicles))
        .route("/vehicles/{vehicle_id}", get(vehicles::get_vehicle))
        .route("/simulation/advance", post(simulation::advance))
        .route("/simulation/events", get(simulation::get_events))
        .route("/simulation/summary", get(simulation::get_summary))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

#[cfg(test)]
pub(crate) fn test_engine(max_slots: u32, fleet: usize) -> Engine {
    let vehicles: Vec<serde_json::Value> = (0..fleet)
        .map(|_| serde_json::json!({"initialSoc": 0.1, "start": "CS"}))
        .collect();
    let scenario = serde_json::json!({
        "seed": 3,
        "durationS": 120,
        "waypoints": {
            "A0B0": {"x": 0, "y": 0},
            "A2B2": {"x": 400, "y": 400},
            "CS": {"x": 100, "y": 0}
        },
        "station": {
            "waypoint": "CS",
            "maxSlots": max_slots,
            "batteryCapacityWh": 100000,
            "chargingPowerW": 36000,
            "gridRechargePowerW": 36000
        },
        "vehicleProfile": {
            "batteryCapacityWh": 100,
            "energyPerMeterWh": 0,
            "chargingPowerW": 36000,
            "beaconing": false,
            "roaming": []
        },
        "vehicles": vehicles
    });
    Engine::new(serde_json::from_value(scenario).unwrap()).unwrap()
}
