//! Database access: a robust auto-reconnecting wrapper around
//! `tokio_postgres` plus the per-entity query helpers used by the services.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dto::{
    AssessmentResult, Batch, BatchInput, Candidate, CandidateInput, Language, Snippet, Subject,
    SubjectInput, Trial, TrialInput, TrialStatus,
};

/* ---------------- auto-reconnecting pool ---------------- */

pub struct DbPool {
    dsn: String,
    client: RwLock<Option<Arc<Client>>>,
}

impl DbPool {
    pub async fn new(dsn: String) -> Arc<Self> {
        let this = Arc::new(Self {
            dsn,
            client: RwLock::new(None),
        });
        this.reconnect().await.ok();
        let weak = Arc::downgrade(&this);
        tokio::spawn(async move {
            let secs: u64 = std::env::var("DB_PING_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30);
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
                let Some(db) = weak.upgrade() else { break };
                if let Err(e) = db.ping().await {
                    warn!(%e, "db ping failed; reconnecting");
                    let _ = db.reconnect().await;
                }
            }
        });
        this
    }

    async fn connect_once(&self) -> Result<Client, tokio_postgres::Error> {
        let (client, connection) = tokio_postgres::connect(&self.dsn, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(%e, "postgres connection task ended");
            }
        });
        Ok(client)
    }

    async fn reconnect(&self) -> Result<(), tokio_postgres::Error> {
        let client = self.connect_once().await?;
        *self.client.write().await = Some(Arc::new(client));
        info!("postgres connected");
        Ok(())
    }

    async fn current(&self) -> Result<Arc<Client>, tokio_postgres::Error> {
        if let Some(c) = self.client.read().await.as_ref() {
            return Ok(c.clone());
        }
        self.reconnect().await?;
        Ok(self
            .client
            .read()
            .await
            .as_ref()
            .expect("client present after reconnect")
            .clone())
    }

    pub async fn ping(&self) -> Result<(), tokio_postgres::Error> {
        let c = self.current().await?;
        let _ = c.simple_query("SELECT 1").await?;
        Ok(())
    }

    /// Runs `op` against the current client; on a "closed/reset" error the
    /// connection is re-established once and the operation retried.
    pub async fn with_client<F, Fut, T>(&self, op: F) -> Result<T, tokio_postgres::Error>
    where
        F: Fn(Arc<Client>) -> Fut,
        Fut: std::future::Future<Output = Result<T, tokio_postgres::Error>>,
    {
        let c1 = self.current().await?;
        match op(c1).await {
            Ok(v) => Ok(v),
            Err(e) if looks_like_closed(&e) => {
                warn!(%e, "db op on closed connection; reconnecting once");
                self.reconnect().await?;
                let c2 = self.current().await?;
                op(c2).await
            }
            Err(e) => Err(e),
        }
    }
}

fn looks_like_closed(err: &tokio_postgres::Error) -> bool {
    let s = err.to_string().to_lowercase();
    s.contains("closed") || s.contains("broken pipe") || s.contains("connection reset")
}

/* ---------------- candidates ---------------- */

fn row_to_candidate(r: Row) -> Candidate {
    Candidate {
        id: r.get(0),
        name: r.get(1),
        description: r.get(2),
        created_at: r.get(3),
        updated_at: r.get(4),
    }
}

const CANDIDATE_COLS: &str = "id, name, description, created_at, updated_at";

pub async fn insert_candidate(
    db: &Client,
    input: &CandidateInput,
) -> Result<Candidate, tokio_postgres::Error> {
    let now = Utc::now();
    let id = Uuid::new_v4();
    db.execute(
        "INSERT INTO candidates (id, name, description, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5)",
        &[&id, &input.name, &input.description, &now, &now],
    )
    .await?;
    Ok(Candidate {
        id,
        name: input.name.clone(),
        description: input.description.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub async fn fetch_candidate(
    db: &Client,
    id: Uuid,
) -> Result<Option<Candidate>, tokio_postgres::Error> {
    let row = db
        .query_opt(
            &format!("SELECT {CANDIDATE_COLS} FROM candidates WHERE id = $1"),
            &[&id],
        )
        .await?;
    Ok(row.map(row_to_candidate))
}

pub async fn list_candidates(db: &Client) -> Result<Vec<Candidate>, tokio_postgres::Error> {
    let rows = db
        .query(
            &format!("SELECT {CANDIDATE_COLS} FROM candidates ORDER BY created_at DESC"),
            &[],
        )
        .await?;
    Ok(rows.into_iter().map(row_to_candidate).collect())
}

pub async fn fetch_candidates_by_ids(
    db: &Client,
    ids: &[Uuid],
) -> Result<Vec<Candidate>, tokio_postgres::Error> {
    let rows = db
        .query(
            &format!("SELECT {CANDIDATE_COLS} FROM candidates WHERE id = ANY($1)"),
            &[&ids],
        )
        .await?;
    Ok(rows.into_iter().map(row_to_candidate).collect())
}

pub async fn update_candidate(
    db: &Client,
    id: Uuid,
    input: &CandidateInput,
) -> Result<bool, tokio_postgres::Error> {
    let now = Utc::now();
    let n = db
        .execute(
            "UPDATE candidates SET name = $2, description = $3, updated_at = $4 WHERE id = $1",
            &[&id, &input.name, &input.description, &now],
        )
        .await?;
    Ok(n > 0)
}

pub async fn delete_candidate(db: &Client, id: Uuid) -> Result<bool, tokio_postgres::Error> {
    let n = db
        .execute("DELETE FROM candidates WHERE id = $1", &[&id])
        .await?;
    Ok(n > 0)
}

/* ---------------- batches ---------------- */

fn row_to_batch(r: Row) -> Batch {
    Batch {
        id: r.get(0),
        name: r.get(1),
        candidate_ids: r.get(2),
        description: r.get(3),
        created_at: r.get(4),
        updated_at: r.get(5),
    }
}

const BATCH_COLS: &str = "id, name, candidate_ids, description, created_at, updated_at";

pub async fn insert_batch(db: &Client, input: &BatchInput) -> Result<Batch, tokio_postgres::Error> {
    let now = Utc::now();
    let id = Uuid::new_v4();
    db.execute(
        "INSERT INTO batches (id, name, candidate_ids, description, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
        &[&id, &input.name, &input.candidate_ids, &input.description, &now, &now],
    )
    .await?;
    Ok(Batch {
        id,
        name: input.name.clone(),
        candidate_ids: input.candidate_ids.clone(),
        description: input.description.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub async fn fetch_batch(db: &Client, id: Uuid) -> Result<Option<Batch>, tokio_postgres::Error> {
    let row = db
        .query_opt(
            &format!("SELECT {BATCH_COLS} FROM batches WHERE id = $1"),
            &[&id],
        )
        .await?;
    Ok(row.map(row_to_batch))
}

pub async fn fetch_batch_by_name(
    db: &Client,
    name: &str,
) -> Result<Option<Batch>, tokio_postgres::Error> {
    let row = db
        .query_opt(
            &format!("SELECT {BATCH_COLS} FROM batches WHERE name = $1 LIMIT 1"),
            &[&name],
        )
        .await?;
    Ok(row.map(row_to_batch))
}

pub async fn list_batches(db: &Client) -> Result<Vec<Batch>, tokio_postgres::Error> {
    let rows = db
        .query(
            &format!("SELECT {BATCH_COLS} FROM batches ORDER BY created_at DESC"),
            &[],
        )
        .await?;
    Ok(rows.into_iter().map(row_to_batch).collect())
}

pub async fn update_batch(
    db: &Client,
    id: Uuid,
    input: &BatchInput,
) -> Result<bool, tokio_postgres::Error> {
    let now = Utc::now();
    let n = db
        .execute(
            "UPDATE batches SET name = $2, candidate_ids = $3, description = $4, updated_at = $5 \
             WHERE id = $1",
            &[&id, &input.name, &input.candidate_ids, &input.description, &now],
        )
        .await?;
    Ok(n > 0)
}

pub async fn update_batch_candidates(
    db: &Client,
    id: Uuid,
    candidate_ids: &[Uuid],
) -> Result<bool, tokio_postgres::Error> {
    let now = Utc::now();
    let ids = candidate_ids.to_vec();
    let n = db
        .execute(
            "UPDATE batches SET candidate_ids = $2, updated_at = $3 WHERE id = $1",
            &[&id, &ids, &now],
        )
        .await?;
    Ok(n > 0)
}

pub async fn delete_batch(db: &Client, id: Uuid) -> Result<bool, tokio_postgres::Error> {
    let n = db.execute("DELETE FROM batches WHERE id = $1", &[&id]).await?;
    Ok(n > 0)
}

/* ---------------- subjects ---------------- */

fn row_to_subject(r: Row) -> Subject {
    let language: String = r.get(4);
    let snippets: serde_json::Value = r.get(5);
    Subject {
        id: r.get(0),
        batch_id: r.get(1),
        thing_name: r.get(2),
        context: r.get(3),
        language: language.parse().unwrap_or(Language::Javascript),
        snippets: serde_json::from_value::<Vec<Snippet>>(snippets).unwrap_or_default(),
        trials_needed: r.get(6),
        provider_id: r.get(7),
        model_id: r.get(8),
        created_at: r.get(9),
        updated_at: r.get(10),
    }
}

const SUBJECT_COLS: &str = "id, batch_id, thing_name, context, language, snippets, \
                            trials_needed, provider_id, model_id, created_at, updated_at";

pub async fn insert_subject(
    db: &Client,
    input: &SubjectInput,
) -> Result<Subject, tokio_postgres::Error> {
    let now = Utc::now();
    let id = Uuid::new_v4();
    let snippets = serde_json::to_value(&input.snippets).unwrap_or_default();
    db.execute(
        "INSERT INTO subjects \
         (id, batch_id, thing_name, context, language, snippets, trials_needed, \
          provider_id, model_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        &[
            &id,
            &input.batch_id,
            &input.thing_name,
            &input.context,
            &input.language.to_string(),
            &snippets,
            &input.trials_needed,
            &input.provider_id,
            &input.model_id,
            &now,
            &now,
        ],
    )
    .await?;
    Ok(Subject {
        id,
        batch_id: input.batch_id,
        thing_name: input.thing_name.clone(),
        context: input.context.clone(),
        language: input.language,
        snippets: input.snippets.clone(),
        trials_needed: input.trials_needed,
        provider_id: input.provider_id.clone(),
        model_id: input.model_id.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub async fn fetch_subject(
    db: &Client,
    id: Uuid,
) -> Result<Option<Subject>, tokio_postgres::Error> {
    let row = db
        .query_opt(
            &format!("SELECT {SUBJECT_COLS} FROM subjects WHERE id = $1"),
            &[&id],
        )
        .await?;
    Ok(row.map(row_to_subject))
}

pub async fn list_subjects(
    db: &Client,
    batch_id: Option<Uuid>,
) -> Result<Vec<Subject>, tokio_postgres::Error> {
    let rows = if let Some(batch_id) = batch_id {
        db.query(
            &format!(
                "SELECT {SUBJECT_COLS} FROM subjects WHERE batch_id = $1 ORDER BY created_at DESC"
            ),
            &[&batch_id],
        )
        .await?
    } else {
        db.query(
            &format!("SELECT {SUBJECT_COLS} FROM subjects ORDER BY created_at DESC"),
            &[],
        )
        .await?
    };
    Ok(rows.into_iter().map(row_to_subject).collect())
}

pub async fn update_subject(
    db: &Client,
    id: Uuid,
    input: &SubjectInput,
) -> Result<bool, tokio_postgres::Error> {
    let now = Utc::now();
    let snippets = serde_json::to_value(&input.snippets).unwrap_or_default();
    let n = db
        .execute(
            "UPDATE subjects SET batch_id = $2, thing_name = $3, context = $4, language = $5, \
             snippets = $6, trials_needed = $7, provider_id = $8, model_id = $9, updated_at = $10 \
             WHERE id = $1",
            &[
                &id,
                &input.batch_id,
                &input.thing_name,
                &input.context,
                &input.language.to_string(),
                &snippets,
                &input.trials_needed,
                &input.provider_id,
                &input.model_id,
                &now,
            ],
        )
        .await?;
    Ok(n > 0)
}

pub async fn delete_subject(db: &Client, id: Uuid) -> Result<bool, tokio_postgres::Error> {
    let n = db
        .execute("DELETE FROM subjects WHERE id = $1", &[&id])
        .await?;
    Ok(n > 0)
}

/* ---------------- trials ---------------- */

fn row_to_trial(r: Row) -> Trial {
    let status: String = r.get(3);
    let result: Option<serde_json::Value> = r.get(6);
    Trial {
        id: r.get(0),
        subject_id: r.get(1),
        batch_id: r.get(2),
        status: status.parse().unwrap_or(TrialStatus::Pending),
        provider_id: r.get(4),
        model_id: r.get(5),
        result: result.and_then(|v| serde_json::from_value::<AssessmentResult>(v).ok()),
        created_at: r.get(7),
        updated_at: r.get(8),
    }
}

const TRIAL_COLS: &str = "id, subject_id, batch_id, status, provider_id, model_id, result, \
                          created_at, updated_at";

pub async fn insert_trial(db: &Client, input: &TrialInput) -> Result<Trial, tokio_postgres::Error> {
    let now = Utc::now();
    let id = Uuid::new_v4();
    let result = input
        .result
        .as_ref()
        .map(|r| serde_json::to_value(r).unwrap_or_default());
    db.execute(
        "INSERT INTO trials \
         (id, subject_id, batch_id, status, provider_id, model_id, result, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        &[
            &id,
            &input.subject_id,
            &input.batch_id,
            &input.status.to_string(),
            &input.provider_id,
            &input.model_id,
            &result,
            &now,
            &now,
        ],
    )
    .await?;
    Ok(Trial {
        id,
        subject_id: input.subject_id,
        batch_id: input.batch_id,
        status: input.status,
        provider_id: input.provider_id.clone(),
        model_id: input.model_id.clone(),
        result: input.result.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub async fn fetch_trial(db: &Client, id: Uuid) -> Result<Option<Trial>, tokio_postgres::Error> {
    let row = db
        .query_opt(
            &format!("SELECT {TRIAL_COLS} FROM trials WHERE id = $1"),
            &[&id],
        )
        .await?;
    Ok(row.map(row_to_trial))
}

pub async fn list_trials(
    db: &Client,
    subject_id: Option<Uuid>,
    batch_id: Option<Uuid>,
) -> Result<Vec<Trial>, tokio_postgres::Error> {
    let rows = if let Some(subject_id) = subject_id {
        db.query(
            &format!(
                "SELECT {TRIAL_COLS} FROM trials WHERE subject_id = $1 ORDER BY created_at DESC"
            ),
            &[&subject_id],
        )
        .await?
    } else if let Some(batch_id) = batch_id {
        db.query(
            &format!(
                "SELECT {TRIAL_COLS} FROM trials WHERE batch_id = $1 ORDER BY created_at DESC"
            ),
            &[&batch_id],
        )
        .await?
    } else {
        db.query(
            &format!("SELECT {TRIAL_COLS} FROM trials ORDER BY created_at DESC"),
            &[],
        )
        .await?
    };
    Ok(rows.into_iter().map(row_to_trial).collect())
}

/// Completed trials that carry a parsed result; the input to aggregation.
pub async fn list_completed_trials(db: &Client) -> Result<Vec<Trial>, tokio_postgres::Error> {
    let rows = db
        .query(
            &format!(
                "SELECT {TRIAL_COLS} FROM trials \
                 WHERE status = 'completed' AND result IS NOT NULL \
                 ORDER BY created_at DESC"
            ),
            &[],
        )
        .await?;
    Ok(rows.into_iter().map(row_to_trial).collect())
}

pub async fn update_trial(
    db: &Client,
    id: Uuid,
    input: &TrialInput,
) -> Result<bool, tokio_postgres::Error> {
    let now = Utc::now();
    let result = input
        .result
        .as_ref()
        .map(|r| serde_json::to_value(r).unwrap_or_default());
    let n = db
        .execute(
            "UPDATE trials SET subject_id = $2, batch_id = $3, status = $4, provider_id = $5, \
             model_id = $6, result = $7, updated_at = $8 WHERE id = $1",
            &[
                &id,
                &input.subject_id,
                &input.batch_id,
                &input.status.to_string(),
                &input.provider_id,
                &input.model_id,
                &result,
                &now,
            ],
        )
        .await?;
    Ok(n > 0)
}

/// Store a pipeline outcome on a trial and advance its status.
pub async fn update_trial_result(
    db: &Client,
    id: Uuid,
    status: TrialStatus,
    result: &AssessmentResult,
) -> Result<bool, tokio_postgres::Error> {
    let now = Utc::now();
    let value = serde_json::to_value(result).unwrap_or_default();
    let n = db
        .execute(
            "UPDATE trials SET status = $2, provider_id = $3, model_id = $4, result = $5, \
             updated_at = $6 WHERE id = $1",
            &[
                &id,
                &status.to_string(),
                &result.provider_id,
                &result.model_id,
                &value,
                &now,
            ],
        )
        .await?;
    Ok(n > 0)
}

pub async fn delete_trial(db: &Client, id: Uuid) -> Result<bool, tokio_postgres::Error> {
    let n = db.execute("DELETE FROM trials WHERE id = $1", &[&id]).await?;
    Ok(n > 0)
}
