//! HTTP service running the comparative assessment pipeline: ad-hoc
//! assessments over `POST /assess` and stored-trial execution over
//! `POST /trials/{id}/run`.

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use chrono::Utc;
use serde_json::json;
use tokio_postgres::Client;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared::config::Settings;
use shared::db::{self, DbPool};
use shared::dto::{AssessRequest, AssessResponse, AssessmentResult, TrialStatus};
use shared::llm;

use assessor::pipeline::{run_assessment, AssessmentOutcome, PipelineError};

#[derive(Clone)]
struct AppState {
    db: Arc<DbPool>,
    settings: Settings,
}

/* ---------------- run log ---------------- */

async fn ensure_runs_schema(db: &Client) -> Result<(), tokio_postgres::Error> {
    db.execute(
        "CREATE TABLE IF NOT EXISTS assessment_runs ( \
            id SERIAL PRIMARY KEY, \
            trial_id UUID, \
            thing_name TEXT NOT NULL, \
            provider_id TEXT NOT NULL, \
            model_id TEXT NOT NULL, \
            report TEXT NOT NULL, \
            scores JSONB NOT NULL DEFAULT '{}'::jsonb, \
            duration_ms BIGINT NOT NULL DEFAULT 0, \
            created_at TIMESTAMPTZ NOT NULL DEFAULT now() \
        )",
        &[],
    )
    .await?;
    db.execute(
        "CREATE INDEX IF NOT EXISTS assessment_runs_created_idx \
         ON assessment_runs (created_at DESC)",
        &[],
    )
    .await?;
    info!("assessment_runs schema ensured");
    Ok(())
}

async fn insert_run(
    db: &Client,
    trial_id: Option<Uuid>,
    thing_name: &str,
    provider_id: &str,
    model_id: &str,
    outcome: &AssessmentOutcome,
) -> Result<(), tokio_postgres::Error> {
    let scores = serde_json::to_value(&outcome.scores).unwrap_or_default();
    db.execute(
        "INSERT INTO assessment_runs \
         (trial_id, thing_name, provider_id, model_id, report, scores, duration_ms) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
        &[
            &trial_id,
            &thing_name,
            &provider_id,
            &model_id,
            &outcome.report,
            &scores,
            &outcome.duration_ms,
        ],
    )
    .await?;
    Ok(())
}

async fn log_run(state: &AppState, trial_id: Option<Uuid>, request: &AssessRequest, outcome: &AssessmentOutcome) {
    let thing_name = request.thing_name.clone();
    let provider_id = request.provider_id.clone().unwrap_or_default();
    let model_id = request.model_id.clone().unwrap_or_default();
    let result = state
        .db
        .with_client(|c| {
            let thing_name = thing_name.clone();
            let provider_id = provider_id.clone();
            let model_id = model_id.clone();
            async move {
                insert_run(&c, trial_id, &thing_name, &provider_id, &model_id, outcome).await
            }
        })
        .await;
    if let Err(e) = result {
        warn!(%e, "failed to log assessment run");
    }
}

/* ---------------- helpers ---------------- */

async fn candidate_names(state: &AppState, request: &AssessRequest) -> Vec<(Uuid, String)> {
    let ids: Vec<Uuid> = request.snippets.iter().map(|s| s.candidate_id).collect();
    let fetched = state
        .db
        .with_client(|c| {
            let ids = ids.clone();
            async move { db::fetch_candidates_by_ids(&c, &ids).await }
        })
        .await;
    match fetched {
        Ok(candidates) => candidates.into_iter().map(|c| (c.id, c.name)).collect(),
        Err(e) => {
            // Display names degrade to raw ids; the pipeline still runs.
            warn!(%e, "candidate lookup failed");
            Vec::new()
        }
    }
}

fn pipeline_error_response(err: PipelineError) -> HttpResponse {
    match err {
        PipelineError::Invalid(msg) => HttpResponse::BadRequest().json(json!({ "error": msg })),
        PipelineError::MissingApiKey(_) => {
            HttpResponse::InternalServerError().json(json!({ "error": err.to_string() }))
        }
        PipelineError::Llm(e) => HttpResponse::BadGateway().json(json!({
            "error": format!("An error occurred while generating the report. {e}")
        })),
    }
}

/* ---------------- handlers ---------------- */

async fn assess(state: web::Data<AppState>, request: web::Json<AssessRequest>) -> impl Responder {
    let request = request.into_inner();
    let candidates = candidate_names(&state, &request).await;
    let http = llm::http_client(state.settings.llm_timeout_ms);

    match run_assessment(&http, &state.settings, &request, &candidates).await {
        Ok(outcome) => {
            log_run(&state, None, &request, &outcome).await;
            HttpResponse::Ok().json(AssessResponse {
                report: outcome.report,
                scores: outcome.scores,
            })
        }
        Err(e) => pipeline_error_response(e),
    }
}

async fn run_trial(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    let id = path.into_inner();

    let trial = match state
        .db
        .with_client(|c| async move { db::fetch_trial(&c, id).await })
        .await
    {
        Ok(Some(trial)) => trial,
        Ok(None) => return HttpResponse::NotFound().json(json!({ "error": "Trial not found" })),
        Err(e) => {
            error!(%e, "run_trial: trial lookup failed");
            return HttpResponse::InternalServerError().finish();
        }
    };
    if trial.status == TrialStatus::Completed {
        return HttpResponse::Conflict().json(json!({ "error": "Trial is already completed" }));
    }

    let subject_id = trial.subject_id;
    let subject = match state
        .db
        .with_client(|c| async move { db::fetch_subject(&c, subject_id).await })
        .await
    {
        Ok(Some(subject)) => subject,
        Ok(None) => return HttpResponse::NotFound().json(json!({ "error": "Subject not found" })),
        Err(e) => {
            error!(%e, "run_trial: subject lookup failed");
            return HttpResponse::InternalServerError().finish();
        }
    };

    // Trial-specific provider/model, falling back to the subject's defaults.
    let request = AssessRequest {
        thing_name: subject.thing_name.clone(),
        context: subject.context.clone(),
        snippets: subject.snippets.clone(),
        language: Some(subject.language),
        provider_id: trial.provider_id.clone().or(subject.provider_id.clone()),
        model_id: trial.model_id.clone().or(subject.model_id.clone()),
    };
    let candidates = candidate_names(&state, &request).await;
    let http = llm::http_client(state.settings.llm_timeout_ms);

    let outcome = match run_assessment(&http, &state.settings, &request, &candidates).await {
        Ok(outcome) => outcome,
        Err(e) => return pipeline_error_response(e),
    };

    let result = AssessmentResult {
        provider_id: request.provider_id.clone().unwrap_or_default(),
        model_id: request.model_id.clone().unwrap_or_default(),
        report_markdown: outcome.report.clone(),
        scores: outcome.scores.clone(),
        timestamp: Utc::now(),
    };
    let stored = state
        .db
        .with_client(|c| {
            let result = result.clone();
            async move { db::update_trial_result(&c, id, TrialStatus::NeedsReview, &result).await }
        })
        .await;
    match stored {
        Ok(true) => {}
        Ok(false) => return HttpResponse::NotFound().json(json!({ "error": "Trial not found" })),
        Err(e) => {
            error!(%e, "run_trial: failed to store result");
            return HttpResponse::InternalServerError().finish();
        }
    }

    log_run(&state, Some(id), &request, &outcome).await;

    match state
        .db
        .with_client(|c| async move { db::fetch_trial(&c, id).await })
        .await
    {
        Ok(Some(trial)) => HttpResponse::Ok().json(trial),
        Ok(None) => HttpResponse::NotFound().json(json!({ "error": "Trial not found" })),
        Err(e) => {
            error!(%e, "run_trial: reload failed");
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn health(state: web::Data<AppState>) -> impl Responder {
    if let Err(e) = state.db.ping().await {
        return HttpResponse::ServiceUnavailable().body(format!("db not ok: {e}"));
    }
    HttpResponse::Ok().body("OK")
}

/* ---------------- main ---------------- */

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();
    info!("starting assessor service");

    let settings = match Settings::new() {
        Ok(s) => s,
        Err(e) => {
            error!(%e, "failed to load settings");
            std::process::exit(1);
        }
    };

    let db = DbPool::new(settings.database_url.clone()).await;
    let _ = db
        .with_client(|c| async move { ensure_runs_schema(&c).await })
        .await;

    let state = web::Data::new(AppState {
        db,
        settings,
    });

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .route("/assess", web::post().to(assess))
            .route("/trials/{id}/run", web::post().to(run_trial))
            .route("/health", web::get().to(health))
    })
    .bind(("0.0.0.0", 8084))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn assess_rejects_underfilled_request() {
        let settings = Settings::default();
        let db = DbPool::new(settings.database_url.clone()).await;
        let state = web::Data::new(AppState { db, settings });
        let app = test::init_service(
            App::new()
                .app_data(state)
                .route("/assess", web::post().to(assess)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/assess")
            .set_json(serde_json::json!({
                "thingName": "slider",
                "snippets": [],
                "providerId": "openai",
                "modelId": "gpt-4o"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
