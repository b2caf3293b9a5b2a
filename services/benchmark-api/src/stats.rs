//! Normalization of raw score strings and aggregation of completed trials
//! into per-model and per-candidate statistics.

use std::collections::HashMap;

use serde::Serialize;

use shared::dto::{Candidate, Trial};

/// Parses the leading numeric portion of a string, tolerating trailing
/// units or annotations ("8.5 pts").
fn leading_number(s: &str) -> Option<f64> {
    let t = s.trim();
    let end = t
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.' || *c == '-')
        .last()
        .map(|(i, c)| i + c.len_utf8())?;
    t[..end].parse::<f64>().ok()
}

/// Normalizes a raw score string to a 0..10 value. "a/b" fractions are
/// scaled against their denominator; plain numbers pass through; anything
/// unparsable counts as zero.
pub fn parse_score(raw: &str) -> f64 {
    let t = raw.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some((achieved, total)) = t.split_once('/') {
        return match (leading_number(achieved), leading_number(total)) {
            (Some(a), Some(b)) if b != 0.0 => ((a / b) * 10.0).clamp(0.0, 10.0),
            _ => 0.0,
        };
    }
    leading_number(t).map(|v| v.clamp(0.0, 10.0)).unwrap_or(0.0)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Serialize)]
pub struct ModelStat {
    #[serde(rename = "modelId")]
    pub model_id: String,
    #[serde(rename = "providerId")]
    pub provider_id: String,
    #[serde(rename = "meanScore")]
    pub mean_score: f64,
    pub trials: usize,
}

#[derive(Debug, Serialize)]
pub struct CandidateStat {
    pub name: String,
    #[serde(rename = "meanScore")]
    pub mean_score: f64,
    pub trials: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(rename = "completedTrials")]
    pub completed_trials: usize,
    #[serde(rename = "meanQuality")]
    pub mean_quality: f64,
    #[serde(rename = "modelCount")]
    pub model_count: usize,
    pub models: Vec<ModelStat>,
    pub candidates: Vec<CandidateStat>,
}

/// Aggregates completed trials into the dashboard statistics. Score-map
/// keys may be candidate ids or raw display names; ids are resolved back
/// to display names so both shapes land in one leaderboard bucket.
pub fn compute_stats(trials: &[Trial], candidates: &[Candidate]) -> StatsResponse {
    let name_by_id: HashMap<String, &str> = candidates
        .iter()
        .map(|c| (c.id.to_string(), c.name.as_str()))
        .collect();

    struct ModelAcc {
        total: f64,
        count: usize,
        provider_id: String,
    }
    struct CandidateAcc {
        total: f64,
        count: usize,
        display: String,
    }

    let mut model_acc: HashMap<String, ModelAcc> = HashMap::new();
    let mut cand_acc: HashMap<String, CandidateAcc> = HashMap::new();
    let mut overall_total = 0.0;

    for trial in trials {
        let Some(result) = &trial.result else { continue };
        let scores: Vec<f64> = result.scores.values().map(|s| parse_score(s)).collect();
        let trial_mean = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        overall_total += trial_mean;

        if !scores.is_empty() {
            let model_id = if result.model_id.is_empty() {
                "unknown".to_string()
            } else {
                result.model_id.clone()
            };
            let entry = model_acc.entry(model_id).or_insert(ModelAcc {
                total: 0.0,
                count: 0,
                provider_id: result.provider_id.clone(),
            });
            entry.total += trial_mean;
            entry.count += 1;
        }

        for (key, raw) in &result.scores {
            let display = name_by_id
                .get(key.as_str())
                .copied()
                .unwrap_or(key.as_str());
            let normalized = display.trim().to_lowercase();
            let entry = cand_acc.entry(normalized).or_insert(CandidateAcc {
                total: 0.0,
                count: 0,
                display: display.trim().to_string(),
            });
            entry.total += parse_score(raw);
            entry.count += 1;
        }
    }

    let mut models: Vec<ModelStat> = model_acc
        .into_iter()
        .map(|(model_id, acc)| ModelStat {
            model_id,
            provider_id: acc.provider_id,
            mean_score: round2(acc.total / acc.count as f64),
            trials: acc.count,
        })
        .collect();
    models.sort_by(|a, b| b.mean_score.total_cmp(&a.mean_score));

    let mut leaderboard: Vec<CandidateStat> = cand_acc
        .into_values()
        .map(|acc| CandidateStat {
            name: acc.display,
            mean_score: round2(acc.total / acc.count as f64),
            trials: acc.count,
        })
        .collect();
    leaderboard.sort_by(|a, b| b.mean_score.total_cmp(&a.mean_score));

    StatsResponse {
        completed_trials: trials.len(),
        mean_quality: if trials.is_empty() {
            0.0
        } else {
            round2(overall_total / trials.len() as f64)
        },
        model_count: models.len(),
        models,
        candidates: leaderboard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::dto::{AssessmentResult, TrialStatus};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[test]
    fn parse_score_handles_fractions_and_floats() {
        assert!((parse_score("7/15") - 4.666_666).abs() < 1e-3);
        assert_eq!(parse_score("8.5"), 8.5);
        assert_eq!(parse_score(" 9 / 10 "), 9.0);
        assert_eq!(parse_score("8.5 pts"), 8.5);
        assert_eq!(parse_score("12/10"), 10.0);
        assert_eq!(parse_score("3/0"), 0.0);
        assert_eq!(parse_score("n/a"), 0.0);
        assert_eq!(parse_score(""), 0.0);
    }

    fn candidate(name: &str) -> Candidate {
        Candidate {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn trial(model: &str, scores: &[(&str, &str)]) -> Trial {
        let map: BTreeMap<String, String> = scores
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Trial {
            id: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            status: TrialStatus::Completed,
            provider_id: Some("openai".into()),
            model_id: Some(model.into()),
            result: Some(AssessmentResult {
                provider_id: "openai".into(),
                model_id: model.into(),
                report_markdown: String::new(),
                scores: map,
                timestamp: Utc::now(),
            }),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn aggregates_models_and_candidates() {
        let alpha = candidate("Alpha");
        let t1 = trial("gpt-4o", &[("Alpha", "10/10"), ("Beta", "5/10")]);
        // Same candidate under an id key and a differently cased name.
        let alpha_key = alpha.id.to_string();
        let t2 = trial("gemini-3-pro", &[(alpha_key.as_str(), "6/10"), ("beta", "7/10")]);

        let stats = compute_stats(&[t1, t2], &[alpha.clone()]);
        assert_eq!(stats.completed_trials, 2);
        assert_eq!(stats.model_count, 2);

        let alpha_stat = stats.candidates.iter().find(|c| c.name == "Alpha").unwrap();
        assert_eq!(alpha_stat.trials, 2);
        assert!((alpha_stat.mean_score - 8.0).abs() < 1e-9);

        let beta_stat = stats
            .candidates
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case("beta"))
            .unwrap();
        assert_eq!(beta_stat.trials, 2);
        assert!((beta_stat.mean_score - 6.0).abs() < 1e-9);

        // Trial means: (10+5)/2 = 7.5 and (6+7)/2 = 6.5 -> overall 7.0.
        assert!((stats.mean_quality - 7.0).abs() < 1e-9);
        assert_eq!(stats.models[0].model_id, "gpt-4o");
        assert_eq!(stats.models[0].trials, 1);
    }

    #[test]
    fn empty_input_is_all_zeroes() {
        let stats = compute_stats(&[], &[]);
        assert_eq!(stats.completed_trials, 0);
        assert_eq!(stats.mean_quality, 0.0);
        assert!(stats.models.is_empty());
        assert!(stats.candidates.is_empty());
    }
}
