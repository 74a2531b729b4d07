use models::constants::{CONTROLLER_HEALTH_CHECK_ROUTE, CONTROLLER_METRICS_ROUTE};

use actix_web::{http::header, web, HttpResponse};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{event, Level};

/// Liveness and readiness probe.
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

/// Vends the metrics gathered by the prometheus exporter.
pub async fn vending_metrics(registry: web::Data<Registry>) -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buf = Vec::new();
    if let Err(err) = encoder.encode(&metric_families[..], &mut buf) {
        event!(Level::ERROR, %err, "Failed to encode metrics.");
        return HttpResponse::InternalServerError().finish();
    }

    let body = String::from_utf8(buf).unwrap_or_default();
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, prometheus::TEXT_FORMAT))
        .body(body)
}

/// Registers the controller's HTTP routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(CONTROLLER_HEALTH_CHECK_ROUTE, web::get().to(health_check))
        .route(CONTROLLER_METRICS_ROUTE, web::get().to(vending_metrics));
}
