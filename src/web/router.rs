//! Web application router and middleware setup.

use crate::publisher::Publisher;
use crate::web::config::WebConfig;
use crate::web::handlers;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the axum application with all routes and middleware.
pub fn create_app(config: &WebConfig, publisher: Arc<Publisher>) -> Router {
    let mut app: Router<Arc<Publisher>> = Router::new()
        .route("/", get(handlers::index))
        .route("/api/current", get(handlers::get_current))
        .route("/api/average", get(handlers::get_average))
        .route("/api/history", get(handlers::get_history))
        .route("/api/reports", get(handlers::get_reports))
        .route("/api/status", get(handlers::get_status))
        .route("/api/health", get(handlers::health_check));

    if config.compat_json {
        app = app
            .route("/current.json", get(handlers::get_current_compat))
            .route("/average.json", get(handlers::get_average_compat));
    }

    let mut app = app.with_state(publisher);

    if config.enable_cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{Aggregator, Window};
    use crate::publisher::PublisherConfig;
    use crate::sensor::data::Reading;
    use crate::sensor::frame::{decode_frame, Frame};
    use crate::sensor::reader::StatusHandle;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<Aggregator>) {
        app_with(WebConfig::default())
    }

    fn app_with(config: WebConfig) -> (Router, Arc<Aggregator>) {
        let aggregator = Arc::new(Aggregator::new(Window::Count(10)).unwrap());
        let publisher = Arc::new(Publisher::new(
            Arc::clone(&aggregator),
            StatusHandle::default(),
            PublisherConfig::default(),
        )
        .unwrap());
        (create_app(&config, publisher), aggregator)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_current_without_data() {
        let (app, _) = app();
        let (status, body) = get_json(app, "/api/current").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "no data");
    }

    #[tokio::test]
    async fn test_current_and_average() {
        let (app, aggregator) = app();
        let mut reading = Reading::new(chrono::Utc::now());
        reading.sky_temperature = Some(-18.0);
        aggregator.record(reading);

        let (status, body) = get_json(app.clone(), "/api/current").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sky_temperature"], -18.0);

        let (_, body) = get_json(app, "/api/average").await;
        assert_eq!(body["sample_count"], 1);
        assert_eq!(body["sky_temperature"], -18.0);
    }

    #[tokio::test]
    async fn test_reports_lists_latest_auxiliary_reports() {
        let (app, aggregator) = app();
        let (_, body) = get_json(app.clone(), "/api/reports").await;
        assert_eq!(body, serde_json::json!([]));

        for line in ["\x02MT 1 2 3 4 5 6 7 8 9 10 11 12!A5F", "\x02MC 100 200 300!A5F"] {
            match decode_frame(line).unwrap() {
                Frame::Auxiliary(report) => aggregator.record_auxiliary(report),
                other => panic!("expected auxiliary report, got {:?}", other),
            }
        }

        let (status, body) = get_json(app, "/api/reports").await;
        assert_eq!(status, StatusCode::OK);
        let reports = body.as_array().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0]["report_type"], "thermopile_calibration");
        assert_eq!(reports[1]["report_type"], "thresholds");
    }

    #[tokio::test]
    async fn test_compat_json_documents() {
        let (app, aggregator) = app();
        let (status, _) = get_json(app.clone(), "/current.json").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let mut reading = Reading::new(chrono::Utc::now());
        reading.sky_temperature = Some(-18.0);
        reading.rain = crate::sensor::protocol::Precipitation::Dry;
        aggregator.record(reading);

        let (status, body) = get_json(app.clone(), "/current.json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["skyMinusAmbientTemperature"], -18.0);
        assert_eq!(body["windSpeed"], "N/A");
        assert_eq!(body["rainSensor"], false);

        let (status, body) = get_json(app, "/average.json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["skyMinusAmbientTemperature"], -18.0);
    }

    #[tokio::test]
    async fn test_compat_json_can_be_disabled() {
        let (app, _) = app_with(WebConfig::default().with_compat_json(false));
        let response = app
            .oneshot(Request::builder().uri("/average.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_reports_connection_down() {
        let (app, _) = app();
        let (status, body) = get_json(app, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connection"]["state"], "disconnected");
        assert_eq!(body["health"]["status"], "connection_down");
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = app();
        let (status, body) = get_json(app, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "boltwood");
    }
}
