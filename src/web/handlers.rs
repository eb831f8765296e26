//! HTTP handlers for API endpoints.

use crate::publisher::Publisher;
use crate::sensor::protocol::Precipitation;
use crate::sensor::data::{AuxiliaryReport, AverageSnapshot};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

/// Latest decoded reading, or `404` while nothing has been decoded.
pub async fn get_current(State(publisher): State<Arc<Publisher>>) -> Response {
    match publisher.current_reading() {
        Some(reading) => Json(reading).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "status": "no data" }))).into_response(),
    }
}

/// Current average snapshot.
pub async fn get_average(State(publisher): State<Arc<Publisher>>) -> Json<AverageSnapshot> {
    Json(publisher.current_average())
}

/// Published averages, newest first.
pub async fn get_history(State(publisher): State<Arc<Publisher>>) -> Json<Vec<AverageSnapshot>> {
    Json(publisher.history())
}

/// Latest calibration, threshold and wetness reports from the sensor.
pub async fn get_reports(State(publisher): State<Arc<Publisher>>) -> Json<Vec<AuxiliaryReport>> {
    Json(publisher.auxiliary_reports())
}

const COMPAT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const COMPAT_UNKNOWN: &str = "N/A";

/// Flat document with device column names, as served at `/<name>.json`.
fn compat_document(
    time: chrono::DateTime<chrono::Utc>,
    ambient: Option<f64>,
    humidity: Option<f64>,
    wind: Option<f64>,
    sky: Option<f64>,
    rain: Precipitation,
) -> serde_json::Value {
    let number = |v: Option<f64>| v.map_or(json!(COMPAT_UNKNOWN), |v| json!(v));
    json!({
        "time": time.format(COMPAT_TIME_FORMAT).to_string(),
        "ambientTemperature": number(ambient),
        "relativeHumidityPercentage": number(humidity),
        "windSpeed": number(wind),
        "skyMinusAmbientTemperature": number(sky),
        "rainSensor": match rain {
            Precipitation::Wet => json!(true),
            Precipitation::Dry => json!(false),
            Precipitation::Unknown => json!(COMPAT_UNKNOWN),
        },
    })
}

/// `/current.json`
pub async fn get_current_compat(State(publisher): State<Arc<Publisher>>) -> Response {
    match publisher.current_reading() {
        Some(r) => Json(compat_document(
            r.timestamp,
            r.ambient_temperature,
            r.humidity,
            r.wind_speed,
            r.sky_temperature,
            r.rain,
        ))
        .into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "status": "no data" }))).into_response(),
    }
}

/// `/average.json`
pub async fn get_average_compat(State(publisher): State<Arc<Publisher>>) -> Json<serde_json::Value> {
    let a = publisher.current_average();
    Json(compat_document(
        a.computed_at,
        a.ambient_temperature,
        a.humidity,
        a.wind_speed,
        a.sky_temperature,
        a.rain,
    ))
}

/// Connection status and data health.
pub async fn get_status(State(publisher): State<Arc<Publisher>>) -> Json<serde_json::Value> {
    Json(json!({
        "connection": publisher.status(),
        "health": publisher.health(chrono::Utc::now()),
        "log_failing": publisher.log_is_failing(),
    }))
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "boltwood",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Minimal landing page.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Boltwood II Cloud Sensor</title>
</head>
<body>
    <h1>Boltwood II Cloud Sensor</h1>
    <ul>
        <li><a href="/api/current">/api/current</a> latest reading</li>
        <li><a href="/api/average">/api/average</a> current average</li>
        <li><a href="/api/history">/api/history</a> published averages</li>
        <li><a href="/api/reports">/api/reports</a> calibration and threshold reports</li>
        <li><a href="/api/status">/api/status</a> connection status</li>
        <li><a href="/api/health">/api/health</a> service health</li>
    </ul>
</body>
</html>
"#;
