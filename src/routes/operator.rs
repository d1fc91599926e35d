use actix_web::{web, HttpResponse, Responder};

use crate::core::{CycleOutcome, EngineState, MatchingEngine};
use crate::models::{EngineStatusResponse, HealthResponse, LedgerChangeResponse, LedgerResponse};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: MatchingEngine,
}

/// Configure operator routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/engine", web::get().to(engine_status))
        .route("/engine/cycle", web::post().to(run_cycle))
        .route("/ledger", web::get().to(list_ledger))
        .route("/ledger/reset", web::post().to(reset_ledger))
        .route("/ledger/help-requests/{id}", web::delete().to(forget_help_request))
        .route("/ledger/volunteers/{id}", web::delete().to(forget_volunteer));
}

/// Health check endpoint
///
/// Reports `degraded` while the poll loop is stopped.
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let engine = state.engine.state();
    let status = if engine == EngineState::Stopped { "degraded" } else { "healthy" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine,
        timestamp: chrono::Utc::now(),
    })
}

async fn engine_status(state: web::Data<AppState>) -> impl Responder {
    let engine = &state.engine;

    HttpResponse::Ok().json(EngineStatusResponse {
        state: engine.state(),
        radius_meters: Some(engine.radius_meters()),
        poll_interval_secs: engine.poll_interval().map(|d| d.as_secs()),
        stats: engine.stats(),
    })
}

/// Run one evaluation cycle immediately
///
/// POST /api/v1/engine/cycle
///
/// Returns 409 if a cycle is already in flight and 503 if a feed is down.
async fn run_cycle(state: web::Data<AppState>) -> impl Responder {
    let outcome = state.engine.run_cycle().await;

    match &outcome {
        CycleOutcome::Completed(_) => HttpResponse::Ok().json(&outcome),
        CycleOutcome::Skipped => HttpResponse::Conflict().json(&outcome),
        CycleOutcome::FeedUnavailable(_) => HttpResponse::ServiceUnavailable().json(&outcome),
        CycleOutcome::Rejected(_) => HttpResponse::InternalServerError().json(&outcome),
    }
}

async fn list_ledger(state: web::Data<AppState>) -> impl Responder {
    let entries = state.engine.ledger_entries().await;

    HttpResponse::Ok().json(LedgerResponse {
        total: entries.len(),
        entries,
    })
}

/// Clear every ledger entry so in-range pairs are dispatched again
///
/// POST /api/v1/ledger/reset
async fn reset_ledger(state: web::Data<AppState>) -> impl Responder {
    let removed = state.engine.reset_ledger().await;
    ledger_change(&state, removed).await
}

/// DELETE /api/v1/ledger/help-requests/{id}
async fn forget_help_request(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    let removed = state.engine.forget_help_request(&id).await;
    ledger_change(&state, removed).await
}

/// DELETE /api/v1/ledger/volunteers/{id}
async fn forget_volunteer(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    let removed = state.engine.forget_volunteer(&id).await;
    ledger_change(&state, removed).await
}

async fn ledger_change(state: &AppState, removed: usize) -> HttpResponse {
    let remaining = state.engine.ledger_entries().await.len();
    HttpResponse::Ok().json(LedgerChangeResponse { removed, remaining })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HelpRequestRecord, VolunteerRecord};
    use crate::services::{LogSink, MemoryFeed};
    use actix_web::{test, App};
    use std::sync::Arc;

    async fn state_with_pair() -> AppState {
        let feed = Arc::new(MemoryFeed::new());
        feed.set_help_requests(vec![HelpRequestRecord {
            id: "h1".to_string(),
            location: Some("35.0, -82.0".to_string()),
            category: "water".to_string(),
            description: None,
            created_at: None,
        }])
        .await;
        feed.set_volunteers(vec![VolunteerRecord {
            id: "v1".to_string(),
            location: Some("35.0, -82.0".to_string()),
            name: None,
            phone: None,
            registered_at: None,
        }])
        .await;

        let engine = MatchingEngine::builder(feed.clone(), feed, Arc::new(LogSink))
            .build()
            .unwrap();
        AppState { engine }
    }

    #[actix_web::test]
    async fn test_health_reports_stopped_engine() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state_with_pair().await))
                .configure(crate::routes::configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/health").to_request();
        let body: HealthResponse = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body.status, "degraded");
        assert_eq!(body.engine, EngineState::Stopped);
    }

    #[actix_web::test]
    async fn test_cycle_then_forget_via_api() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state_with_pair().await))
                .configure(crate::routes::configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/engine/cycle").to_request();
        let outcome: CycleOutcome = test::call_and_read_body_json(&app, req).await;
        match outcome {
            CycleOutcome::Completed(report) => assert_eq!(report.dispatched, 1),
            other => panic!("unexpected outcome {:?}", other),
        }

        let req = test::TestRequest::get().uri("/api/v1/ledger").to_request();
        let ledger: LedgerResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(ledger.total, 1);
        assert_eq!(ledger.entries[0].pair.help_request_id, "h1");

        let req = test::TestRequest::delete()
            .uri("/api/v1/ledger/help-requests/h1")
            .to_request();
        let change: LedgerChangeResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(change.removed, 1);
        assert_eq!(change.remaining, 0);
    }

    #[actix_web::test]
    async fn test_reset_on_empty_ledger() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state_with_pair().await))
                .configure(crate::routes::configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/ledger/reset").to_request();
        let change: LedgerChangeResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(change.removed, 0);
    }
}
