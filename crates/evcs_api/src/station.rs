use axum::{Json, extract::State};
use evcs_core::StationStatus;

use crate::{SharedEngine, lock};

/// Get station occupancy, battery and counters
pub async fn get_station_status(State(engine): State<SharedEngine>) -> Json<StationStatus> {
    tracing::info!("Getting station status");
    let engine = lock(&engine);
    Json(engine.station_status())
}
