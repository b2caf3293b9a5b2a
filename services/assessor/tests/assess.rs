use serial_test::serial;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared::config::Settings;
use shared::dto::{AssessRequest, Language, Snippet};
use shared::llm;

use assessor::pipeline;

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 0,
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 }
    })
}

fn settings() -> Settings {
    Settings {
        openai_api_key: "sk-test".into(),
        llm_retries: 0,
        llm_timeout_ms: 5_000,
        ..Settings::default()
    }
}

fn request(alpha: Uuid, beta: Uuid) -> AssessRequest {
    AssessRequest {
        thing_name: "slider component".into(),
        context: "embedded UI".into(),
        snippets: vec![
            Snippet { candidate_id: alpha, content: "fn a() {}".into() },
            Snippet { candidate_id: beta, content: "fn b() {}".into() },
        ],
        language: Some(Language::Rust),
        provider_id: Some("openai".into()),
        model_id: Some("gpt-4o".into()),
    }
}

const REPORT_BODY: &str = "## Comparison Matrix\n\n\
    | Feature | Alpha | Beta |\n\
    | --- | --- | --- |\n\
    | Data Cleaning | \u{2705} | \u{274c} |\n\n\
    Deep analysis follows.";

const SUMMARY_BODY: &str = "### Summary Scores\n\n\
    | Alpha | Beta |\n\
    | --- | --- |\n\
    | 7/15 | 12/15 |\n\n\
    Each check scored one point.\n\n\
    ```json\n{\"Alpha\": \"7/15\", \"Beta\": \"12/15\"}\n```";

#[actix_web::test]
#[serial]
async fn full_pipeline_produces_report_and_scores() {
    let server = MockServer::start().await;
    std::env::set_var("OPENAI_API_BASE", server.uri());

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Based on the following comparison matrix"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(SUMMARY_BODY)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Conduct a rigorous"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(REPORT_BODY)))
        .expect(1)
        .mount(&server)
        .await;

    let alpha = Uuid::new_v4();
    let beta = Uuid::new_v4();
    let candidates = vec![(alpha, "Alpha".to_string()), (beta, "Beta".to_string())];

    let client = llm::http_client(5_000);
    let outcome = pipeline::run_assessment(&client, &settings(), &request(alpha, beta), &candidates)
        .await
        .unwrap();

    assert!(outcome
        .report
        .starts_with("# Architectural Assessment Report for: slider component"));
    assert!(outcome.report.contains("**Code context:** embedded UI"));
    assert!(outcome.report.contains("### Appendix: Assessment Methodology"));

    // The summary section sits between the matrix and the rest of the body.
    let matrix = outcome.report.find("| Data Cleaning |").unwrap();
    let summary = outcome.report.find("### Summary Scores").unwrap();
    let analysis = outcome.report.find("Deep analysis follows.").unwrap();
    assert!(matrix < summary && summary < analysis);

    assert_eq!(outcome.scores.get(&alpha.to_string()).unwrap(), "7/15");
    assert_eq!(outcome.scores.get(&beta.to_string()).unwrap(), "12/15");

    std::env::remove_var("OPENAI_API_BASE");
}

#[actix_web::test]
#[serial]
async fn tableless_response_skips_scoring_call() {
    let server = MockServer::start().await;
    std::env::set_var("OPENAI_API_BASE", server.uri());

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("Prose only, no matrix.")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let alpha = Uuid::new_v4();
    let beta = Uuid::new_v4();
    let candidates = vec![(alpha, "Alpha".to_string()), (beta, "Beta".to_string())];

    let client = llm::http_client(5_000);
    let outcome = pipeline::run_assessment(&client, &settings(), &request(alpha, beta), &candidates)
        .await
        .unwrap();

    assert!(outcome.scores.is_empty());
    assert!(outcome.report.contains("Prose only, no matrix."));

    std::env::remove_var("OPENAI_API_BASE");
}

#[actix_web::test]
#[serial]
async fn provider_failure_surfaces_as_llm_error() {
    let server = MockServer::start().await;
    std::env::set_var("OPENAI_API_BASE", server.uri());

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let alpha = Uuid::new_v4();
    let beta = Uuid::new_v4();
    let candidates = vec![(alpha, "Alpha".to_string()), (beta, "Beta".to_string())];

    let client = llm::http_client(5_000);
    let err = pipeline::run_assessment(&client, &settings(), &request(alpha, beta), &candidates)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        pipeline::PipelineError::Llm(llm::LlmError::Http(429))
    ));

    std::env::remove_var("OPENAI_API_BASE");
}

#[actix_web::test]
async fn missing_provider_is_invalid() {
    let alpha = Uuid::new_v4();
    let beta = Uuid::new_v4();
    let mut req = request(alpha, beta);
    req.provider_id = None;

    let client = llm::http_client(5_000);
    let err = pipeline::run_assessment(&client, &settings(), &req, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, pipeline::PipelineError::Invalid(_)));
}
