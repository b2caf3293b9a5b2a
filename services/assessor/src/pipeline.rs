//! The assessment pipeline: prompt construction, the comparative-assessment
//! call, table selection, the summary-score call and report stitching. Every
//! extraction stage degrades rather than failing the run; only validation
//! and provider transport errors abort.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use shared::config::Settings;
use shared::dto::AssessRequest;
use shared::llm::{self, LlmError, ProviderKind};
use shared::providers;

use crate::prompt::{build_assessment_prompt, build_scoring_prompt};
use crate::report::{best_table, find_tables, inject_summary, stitch_report};
use crate::scores::{extract_scores, resolve_keys};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0} API key is not configured.")]
    MissingApiKey(&'static str),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[derive(Debug)]
pub struct AssessmentOutcome {
    pub report: String,
    pub scores: BTreeMap<String, String>,
    pub duration_ms: i64,
}

/// Runs the full pipeline for one request. `candidates` carries the resolved
/// display names for the snippet candidate ids; ids without a stored
/// candidate fall back to their raw uuid string as the display name.
pub async fn run_assessment(
    http: &awc::Client,
    settings: &Settings,
    request: &AssessRequest,
    candidates: &[(Uuid, String)],
) -> Result<AssessmentOutcome, PipelineError> {
    if request.thing_name.trim().is_empty() || request.snippets.len() < 2 {
        return Err(PipelineError::Invalid(
            "Invalid request. Please provide a name and at least two implementations.".into(),
        ));
    }
    let (Some(provider_id), Some(model_id)) =
        (request.provider_id.as_deref(), request.model_id.as_deref())
    else {
        return Err(PipelineError::Invalid(
            "Provider and Model must be selected.".into(),
        ));
    };
    let provider = providers::provider_for(provider_id)
        .ok_or_else(|| PipelineError::Invalid(format!("Unknown provider: {provider_id}")))?;
    let kind = ProviderKind::from_id(provider.id)
        .ok_or_else(|| PipelineError::Invalid(format!("Unknown provider: {provider_id}")))?;
    let api_key = providers::api_key_for(settings, provider.id)
        .ok_or(PipelineError::MissingApiKey(provider.name))?;

    let language = request
        .language
        .map(|l| l.to_string())
        .unwrap_or_else(|| "javascript".into());
    let labeled: Vec<(String, String)> = request
        .snippets
        .iter()
        .map(|s| {
            let name = candidates
                .iter()
                .find(|(id, _)| *id == s.candidate_id)
                .map(|(_, name)| name.clone())
                .unwrap_or_else(|| s.candidate_id.to_string());
            (name, s.content.clone())
        })
        .collect();
    let names: Vec<String> = labeled.iter().map(|(name, _)| name.clone()).collect();

    let prompt = build_assessment_prompt(&request.thing_name, &request.context, &language, &labeled);
    info!(
        provider = provider.id,
        model = model_id,
        snippets = request.snippets.len(),
        "sending assessment prompt"
    );

    let started = Instant::now();
    let mut body = llm::chat_with_retries(
        http,
        kind,
        model_id,
        api_key,
        None,
        &prompt,
        settings.llm_retries,
    )
    .await?
    .replace("\r\n", "\n");

    let mut scores = BTreeMap::new();
    let tables = find_tables(&body);
    if let Some(table) = best_table(&tables, &names).cloned() {
        let scoring_prompt = build_scoring_prompt(&table);
        match llm::chat_with_retries(
            http,
            kind,
            model_id,
            api_key,
            None,
            &scoring_prompt,
            settings.llm_retries,
        )
        .await
        {
            Ok(summary) => {
                let summary = summary.replace("\r\n", "\n");
                let raw = extract_scores(&summary, &names);
                if raw.is_empty() {
                    warn!("no scores recovered from summary response");
                }
                scores = resolve_keys(raw, candidates);
                body = inject_summary(&body, &table, &summary);
            }
            Err(e) => warn!(%e, "summary scoring call failed; report kept without summary"),
        }
    } else {
        info!("no comparison table found in response; skipping scoring call");
    }

    let report = stitch_report(&request.thing_name, &request.context, &body, &prompt);
    Ok(AssessmentOutcome {
        report,
        scores,
        duration_ms: started.elapsed().as_millis() as i64,
    })
}
