//! REST API over the benchmark registry: candidates, batches, subjects and
//! trials, plus the provider listing and aggregate statistics.

use std::collections::HashSet;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use serde::Deserialize;
use serde_json::json;
use tokio_postgres::error::SqlState;
use tokio_postgres::Client;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use shared::config::Settings;
use shared::db::{self, DbPool};
use shared::dto::{BatchInput, CandidateInput, SubjectInput, TrialInput, TrialStatus};
use shared::error::AppError;
use shared::providers;

mod stats;

#[derive(Clone)]
struct AppState {
    db: Arc<DbPool>,
    settings: Settings,
}

/* ---------------- schema bootstrap ---------------- */

async fn ensure_schema(db: &Client) -> Result<(), tokio_postgres::Error> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS candidates ( \
            id UUID PRIMARY KEY, \
            name TEXT NOT NULL, \
            description TEXT, \
            created_at TIMESTAMPTZ NOT NULL, \
            updated_at TIMESTAMPTZ NOT NULL \
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS candidates_name_idx ON candidates (name)",
        "CREATE TABLE IF NOT EXISTS batches ( \
            id UUID PRIMARY KEY, \
            name TEXT NOT NULL, \
            candidate_ids UUID[] NOT NULL DEFAULT '{}', \
            description TEXT, \
            created_at TIMESTAMPTZ NOT NULL, \
            updated_at TIMESTAMPTZ NOT NULL \
        )",
        "CREATE INDEX IF NOT EXISTS batches_created_idx ON batches (created_at DESC)",
        "CREATE TABLE IF NOT EXISTS subjects ( \
            id UUID PRIMARY KEY, \
            batch_id UUID NOT NULL, \
            thing_name TEXT NOT NULL, \
            context TEXT NOT NULL DEFAULT '', \
            language TEXT NOT NULL, \
            snippets JSONB NOT NULL DEFAULT '[]'::jsonb, \
            trials_needed INTEGER NOT NULL DEFAULT 3, \
            provider_id TEXT, \
            model_id TEXT, \
            created_at TIMESTAMPTZ NOT NULL, \
            updated_at TIMESTAMPTZ NOT NULL \
        )",
        "CREATE INDEX IF NOT EXISTS subjects_batch_created_idx \
         ON subjects (batch_id, created_at DESC)",
        "CREATE TABLE IF NOT EXISTS trials ( \
            id UUID PRIMARY KEY, \
            subject_id UUID NOT NULL, \
            batch_id UUID NOT NULL, \
            status TEXT NOT NULL DEFAULT 'pending', \
            provider_id TEXT, \
            model_id TEXT, \
            result JSONB, \
            created_at TIMESTAMPTZ NOT NULL, \
            updated_at TIMESTAMPTZ NOT NULL \
        )",
        "CREATE INDEX IF NOT EXISTS trials_subject_created_idx \
         ON trials (subject_id, created_at)",
        "CREATE INDEX IF NOT EXISTS trials_batch_created_idx \
         ON trials (batch_id, created_at)",
    ];
    for statement in statements {
        db.execute(statement, &[]).await?;
    }
    info!("database schema ensured");
    Ok(())
}

/* ---------------- error helpers ---------------- */

fn db_err(e: tokio_postgres::Error) -> AppError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        return AppError::Conflict("A candidate with this name already exists".into());
    }
    error!(%e, "db error");
    AppError::Database(e.to_string())
}

/* ---------------- candidates ---------------- */

async fn list_candidates(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let items = state
        .db
        .with_client(|c| async move { db::list_candidates(&c).await })
        .await
        .map_err(db_err)?;
    Ok(HttpResponse::Ok().json(items))
}

async fn get_candidate(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let item = state
        .db
        .with_client(|c| async move { db::fetch_candidate(&c, id).await })
        .await
        .map_err(db_err)?
        .ok_or(AppError::NotFound("Candidate"))?;
    Ok(HttpResponse::Ok().json(item))
}

async fn save_candidate(
    state: web::Data<AppState>,
    input: web::Json<CandidateInput>,
) -> Result<HttpResponse, AppError> {
    let input = input.into_inner();
    if input.name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".into()));
    }

    if let Some(id) = input.id {
        let updated = state
            .db
            .with_client(|c| {
                let input = input.clone();
                async move { db::update_candidate(&c, id, &input).await }
            })
            .await
            .map_err(db_err)?;
        if !updated {
            return Err(AppError::NotFound("Candidate"));
        }
        let item = state
            .db
            .with_client(|c| async move { db::fetch_candidate(&c, id).await })
            .await
            .map_err(db_err)?
            .ok_or(AppError::NotFound("Candidate"))?;
        Ok(HttpResponse::Ok().json(item))
    } else {
        let item = state
            .db
            .with_client(|c| {
                let input = input.clone();
                async move { db::insert_candidate(&c, &input).await }
            })
            .await
            .map_err(db_err)?;
        Ok(HttpResponse::Ok().json(item))
    }
}

async fn delete_candidate(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let deleted = state
        .db
        .with_client(|c| async move { db::delete_candidate(&c, id).await })
        .await
        .map_err(db_err)?;
    if !deleted {
        return Err(AppError::NotFound("Candidate"));
    }
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

/* ---------------- batches ---------------- */

async fn list_batches(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let items = state
        .db
        .with_client(|c| async move { db::list_batches(&c).await })
        .await
        .map_err(db_err)?;
    Ok(HttpResponse::Ok().json(items))
}

async fn get_batch(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let item = state
        .db
        .with_client(|c| async move { db::fetch_batch(&c, id).await })
        .await
        .map_err(db_err)?
        .ok_or(AppError::NotFound("Batch"))?;
    Ok(HttpResponse::Ok().json(item))
}

async fn save_batch(
    state: web::Data<AppState>,
    input: web::Json<BatchInput>,
) -> Result<HttpResponse, AppError> {
    let input = input.into_inner();
    if input.name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".into()));
    }

    if let Some(id) = input.id {
        let updated = state
            .db
            .with_client(|c| {
                let input = input.clone();
                async move { db::update_batch(&c, id, &input).await }
            })
            .await
            .map_err(db_err)?;
        if !updated {
            return Err(AppError::NotFound("Batch"));
        }
        let item = state
            .db
            .with_client(|c| async move { db::fetch_batch(&c, id).await })
            .await
            .map_err(db_err)?
            .ok_or(AppError::NotFound("Batch"))?;
        Ok(HttpResponse::Ok().json(item))
    } else {
        let item = state
            .db
            .with_client(|c| {
                let input = input.clone();
                async move { db::insert_batch(&c, &input).await }
            })
            .await
            .map_err(db_err)?;
        Ok(HttpResponse::Ok().json(item))
    }
}

async fn delete_batch(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let deleted = state
        .db
        .with_client(|c| async move { db::delete_batch(&c, id).await })
        .await
        .map_err(db_err)?;
    if !deleted {
        return Err(AppError::NotFound("Batch"));
    }
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[derive(Deserialize)]
struct PlaygroundInput {
    #[serde(rename = "candidateIds", default)]
    candidate_ids: Vec<Uuid>,
}

/// Get-or-create the well-known "Playground" batch and union the posted
/// candidate ids into its lineup.
async fn playground_batch(
    state: web::Data<AppState>,
    input: web::Json<PlaygroundInput>,
) -> Result<HttpResponse, AppError> {
    let input = input.into_inner();
    let existing = state
        .db
        .with_client(|c| async move { db::fetch_batch_by_name(&c, "Playground").await })
        .await
        .map_err(db_err)?;

    let batch = match existing {
        Some(mut batch) => {
            let known: HashSet<Uuid> = batch.candidate_ids.iter().copied().collect();
            let missing: Vec<Uuid> = input
                .candidate_ids
                .iter()
                .copied()
                .filter(|id| !known.contains(id))
                .collect();
            if !missing.is_empty() {
                batch.candidate_ids.extend(missing);
                let id = batch.id;
                let ids = batch.candidate_ids.clone();
                state
                    .db
                    .with_client(|c| {
                        let ids = ids.clone();
                        async move { db::update_batch_candidates(&c, id, &ids).await }
                    })
                    .await
                    .map_err(db_err)?;
            }
            batch
        }
        None => {
            let new_batch = BatchInput {
                id: None,
                name: "Playground".into(),
                candidate_ids: input.candidate_ids.clone(),
                description: None,
            };
            state
                .db
                .with_client(|c| {
                    let new_batch = new_batch.clone();
                    async move { db::insert_batch(&c, &new_batch).await }
                })
                .await
                .map_err(db_err)?
        }
    };
    Ok(HttpResponse::Ok().json(batch))
}

/* ---------------- subjects ---------------- */

#[derive(Deserialize)]
struct SubjectListParams {
    #[serde(rename = "batchId", default)]
    batch_id: Option<Uuid>,
}

async fn list_subjects(
    state: web::Data<AppState>,
    params: web::Query<SubjectListParams>,
) -> Result<HttpResponse, AppError> {
    let batch_id = params.batch_id;
    let items = state
        .db
        .with_client(|c| async move { db::list_subjects(&c, batch_id).await })
        .await
        .map_err(db_err)?;
    Ok(HttpResponse::Ok().json(items))
}

async fn get_subject(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let item = state
        .db
        .with_client(|c| async move { db::fetch_subject(&c, id).await })
        .await
        .map_err(db_err)?
        .ok_or(AppError::NotFound("Subject"))?;
    Ok(HttpResponse::Ok().json(item))
}

async fn save_subject(
    state: web::Data<AppState>,
    input: web::Json<SubjectInput>,
) -> Result<HttpResponse, AppError> {
    let input = input.into_inner();
    if input.thing_name.trim().is_empty() {
        return Err(AppError::Validation("thingName must not be empty".into()));
    }

    if let Some(id) = input.id {
        let updated = state
            .db
            .with_client(|c| {
                let input = input.clone();
                async move { db::update_subject(&c, id, &input).await }
            })
            .await
            .map_err(db_err)?;
        if !updated {
            return Err(AppError::NotFound("Subject"));
        }
        let item = state
            .db
            .with_client(|c| async move { db::fetch_subject(&c, id).await })
            .await
            .map_err(db_err)?
            .ok_or(AppError::NotFound("Subject"))?;
        Ok(HttpResponse::Ok().json(item))
    } else {
        let subject = state
            .db
            .with_client(|c| {
                let input = input.clone();
                async move { db::insert_subject(&c, &input).await }
            })
            .await
            .map_err(db_err)?;

        // Seed the pending trials this subject asks for.
        for _ in 0..subject.trials_needed.max(0) {
            let trial = TrialInput {
                id: None,
                subject_id: subject.id,
                batch_id: subject.batch_id,
                status: TrialStatus::Pending,
                provider_id: subject.provider_id.clone(),
                model_id: subject.model_id.clone(),
                result: None,
            };
            state
                .db
                .with_client(|c| {
                    let trial = trial.clone();
                    async move { db::insert_trial(&c, &trial).await }
                })
                .await
                .map_err(db_err)?;
        }
        Ok(HttpResponse::Ok().json(subject))
    }
}

async fn delete_subject(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let deleted = state
        .db
        .with_client(|c| async move { db::delete_subject(&c, id).await })
        .await
        .map_err(db_err)?;
    if !deleted {
        return Err(AppError::NotFound("Subject"));
    }
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

/* ---------------- trials ---------------- */

#[derive(Deserialize)]
struct TrialListParams {
    #[serde(rename = "subjectId", default)]
    subject_id: Option<Uuid>,
    #[serde(rename = "batchId", default)]
    batch_id: Option<Uuid>,
}

async fn list_trials(
    state: web::Data<AppState>,
    params: web::Query<TrialListParams>,
) -> Result<HttpResponse, AppError> {
    let subject_id = params.subject_id;
    let batch_id = params.batch_id;
    let items = state
        .db
        .with_client(|c| async move { db::list_trials(&c, subject_id, batch_id).await })
        .await
        .map_err(db_err)?;
    Ok(HttpResponse::Ok().json(items))
}

async fn get_trial(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let item = state
        .db
        .with_client(|c| async move { db::fetch_trial(&c, id).await })
        .await
        .map_err(db_err)?
        .ok_or(AppError::NotFound("Trial"))?;
    Ok(HttpResponse::Ok().json(item))
}

async fn save_trial(
    state: web::Data<AppState>,
    input: web::Json<TrialInput>,
) -> Result<HttpResponse, AppError> {
    let input = input.into_inner();

    if let Some(id) = input.id {
        let updated = state
            .db
            .with_client(|c| {
                let input = input.clone();
                async move { db::update_trial(&c, id, &input).await }
            })
            .await
            .map_err(db_err)?;
        if !updated {
            return Err(AppError::NotFound("Trial"));
        }
        let item = state
            .db
            .with_client(|c| async move { db::fetch_trial(&c, id).await })
            .await
            .map_err(db_err)?
            .ok_or(AppError::NotFound("Trial"))?;
        Ok(HttpResponse::Ok().json(item))
    } else {
        let item = state
            .db
            .with_client(|c| {
                let input = input.clone();
                async move { db::insert_trial(&c, &input).await }
            })
            .await
            .map_err(db_err)?;
        Ok(HttpResponse::Ok().json(item))
    }
}

async fn delete_trial(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let deleted = state
        .db
        .with_client(|c| async move { db::delete_trial(&c, id).await })
        .await
        .map_err(db_err)?;
    if !deleted {
        return Err(AppError::NotFound("Trial"));
    }
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

/* ---------------- providers & stats ---------------- */

async fn list_providers(state: web::Data<AppState>) -> impl Responder {
    let available = providers::available(&state.settings);
    info!(
        providers = ?available.iter().map(|p| p.id).collect::<Vec<_>>(),
        "available providers identified"
    );
    HttpResponse::Ok().json(json!({ "providers": available }))
}

async fn get_stats(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let trials = state
        .db
        .with_client(|c| async move { db::list_completed_trials(&c).await })
        .await
        .map_err(db_err)?;
    let candidates = state
        .db
        .with_client(|c| async move { db::list_candidates(&c).await })
        .await
        .map_err(db_err)?;
    Ok(HttpResponse::Ok().json(stats::compute_stats(&trials, &candidates)))
}

/* ---------------- health ---------------- */

async fn health(state: web::Data<AppState>) -> impl Responder {
    if let Err(e) = state.db.ping().await {
        return HttpResponse::ServiceUnavailable().body(format!("db not ok: {e}"));
    }
    HttpResponse::Ok().body("OK")
}

/* ---------------- main ---------------- */

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    info!("starting benchmark-api");

    let settings = match Settings::new() {
        Ok(s) => s,
        Err(e) => {
            error!(%e, "failed to load settings");
            std::process::exit(1);
        }
    };

    let db = DbPool::new(settings.database_url.clone()).await;
    let _ = db
        .with_client(|c| async move { ensure_schema(&c).await })
        .await;

    let state = web::Data::new(AppState { db, settings });

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .route("/health", web::get().to(health))
            .route("/candidates", web::get().to(list_candidates))
            .route("/candidates", web::post().to(save_candidate))
            .route("/candidates/{id}", web::get().to(get_candidate))
            .route("/candidates/{id}", web::delete().to(delete_candidate))
            .route("/batches", web::get().to(list_batches))
            .route("/batches", web::post().to(save_batch))
            .route("/batches/playground", web::post().to(playground_batch))
            .route("/batches/{id}", web::get().to(get_batch))
            .route("/batches/{id}", web::delete().to(delete_batch))
            .route("/subjects", web::get().to(list_subjects))
            .route("/subjects", web::post().to(save_subject))
            .route("/subjects/{id}", web::get().to(get_subject))
            .route("/subjects/{id}", web::delete().to(delete_subject))
            .route("/trials", web::get().to(list_trials))
            .route("/trials", web::post().to(save_trial))
            .route("/trials/{id}", web::get().to(get_trial))
            .route("/trials/{id}", web::delete().to(delete_trial))
            .route("/providers", web::get().to(list_providers))
            .route("/stats", web::get().to(get_stats))
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    async fn test_state() -> web::Data<AppState> {
        let settings = Settings::default();
        let db = DbPool::new(settings.database_url.clone()).await;
        web::Data::new(AppState { db, settings })
    }

    #[actix_web::test]
    async fn health_reports_db_state() {
        let state = test_state().await;
        let app =
            test::init_service(App::new().app_data(state).route("/health", web::get().to(health)))
                .await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success() || resp.status().is_server_error());
    }

    #[actix_web::test]
    async fn providers_empty_without_keys() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(state)
                .route("/providers", web::get().to(list_providers)),
        )
        .await;
        let req = test::TestRequest::get().uri("/providers").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["providers"], serde_json::json!([]));
    }
}
