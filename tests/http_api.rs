//! End-to-end API behavior driven through the router, without sockets.

use learnbox::config::descriptor::PolicyDescriptor;
use learnbox::core::governor::ThreadGovernor;
use learnbox::http::{Request, Response, Router};
use learnbox::lessons::StaticLessonStore;
use learnbox::Sandbox;
use serde_json::{json, Value};
use std::sync::Arc;

fn router_with(policy: PolicyDescriptor) -> Router {
    let sandbox = Sandbox::new(policy, Arc::new(ThreadGovernor::new()));
    Router::new(
        Arc::new(sandbox),
        Arc::new(StaticLessonStore::bundled().unwrap()),
    )
}

fn router() -> Router {
    router_with(PolicyDescriptor {
        max_wall_clock_millis: 300,
        ..Default::default()
    })
}

fn post_run(router: &Router, body: Value) -> (u16, Value) {
    let request = Request::new("POST", "/api/run", body.to_string()).unwrap();
    let response = router.handle(&request);
    (response.status, response.json_body().unwrap())
}

fn get(router: &Router, target: &str) -> Response {
    router.handle(&Request::new("GET", target, "").unwrap())
}

#[test]
fn test_hello_world() {
    let (status, body) = post_run(&router(), json!({"code": "print(\"Hello, World!\")"}));
    assert_eq!(status, 200);
    assert_eq!(body, json!({"output": "Hello, World!", "error": ""}));
}

#[test]
fn test_empty_program_reports_success_marker() {
    let router = router();
    let expected = json!({"output": "✅ Code ran successfully!", "error": ""});

    let (status, body) = post_run(&router, json!({"code": ""}));
    assert_eq!(status, 200);
    assert_eq!(body, expected);

    // A missing field is the empty program too.
    let (status, body) = post_run(&router, json!({}));
    assert_eq!(status, 200);
    assert_eq!(body, expected);
}

#[test]
fn test_forbidden_import_is_blocked() {
    let router = router();
    let (status, body) = post_run(&router, json!({"code": "import os"}));
    assert_eq!(status, 400);
    assert_eq!(body["output"], "");
    let error = body["error"].as_str().unwrap();
    assert!(error.starts_with("⚠️ Unsafe code blocked"), "{error}");
    assert!(error.contains("import"));
    assert_eq!(router.metrics().runtime_invocations.get(), 0);
}

#[test]
fn test_infinite_loop_hits_time_limit() {
    let (status, body) = post_run(&router(), json!({"code": "while True: pass"}));
    assert_eq!(status, 400);
    assert_eq!(
        body,
        json!({"output": "", "error": "execution exceeded time limit"})
    );
}

#[test]
fn test_runtime_fault_is_reported_in_error() {
    let (status, body) = post_run(&router(), json!({"code": "print(1)\nprint(missing)"}));
    assert_eq!(status, 400);
    assert_eq!(body["output"], "");
    assert_eq!(
        body["error"],
        "NameError: name 'missing' is not defined (line 2)"
    );
}

#[test]
fn test_truncated_output_is_flagged() {
    let router = router_with(PolicyDescriptor {
        max_output_bytes: 100,
        ..Default::default()
    });
    let (status, body) = post_run(&router, json!({"code": "print('a' * 1100)"}));
    assert_eq!(status, 200);
    assert_eq!(body["truncated"], true);
    assert!(body["output"].as_str().unwrap().len() <= 100);
}

#[test]
fn test_bad_run_bodies() {
    let router = router();
    for raw in ["not json", "[1, 2]", "\"print(1)\"", r#"{"code": 42}"#] {
        let request = Request::new("POST", "/api/run", raw).unwrap();
        let response = router.handle(&request);
        assert_eq!(response.status, 400, "{raw}");
        assert!(response.json_body().unwrap()["error"].is_string());
    }
}

#[test]
fn test_lesson_localization() {
    let router = router();

    let fr = get(&router, "/api/lessons/1?lang=fr").json_body().unwrap();
    assert_eq!(fr["title"], "Introduction à Python");
    assert!(fr["body"].as_str().unwrap().starts_with("Python est comme des Lego"));
    assert_eq!(fr["quiz"]["answer"], "print(\"Hello, World!\")");

    let en = get(&router, "/api/lessons/1").json_body().unwrap();
    let de = get(&router, "/api/lessons/1?lang=de").json_body().unwrap();
    assert_eq!(de, en);
    assert_eq!(en["title"], "Introduction to Python");
    assert_eq!(en["level"], "Beginner");
    assert_eq!(en["id"], 1);
}

#[test]
fn test_unknown_lessons_are_not_found() {
    let router = router();
    for target in ["/api/lessons/999", "/api/lessons/abc", "/api/lessons/-1"] {
        let response = get(&router, target);
        assert_eq!(response.status, 404, "{target}");
        assert_eq!(response.json_body(), Some(json!({"error": "not found"})));
    }
}

#[test]
fn test_lesson_listing_filters_by_level() {
    let router = router();
    let all = get(&router, "/api/lessons").json_body().unwrap();
    let all = all.as_array().unwrap();
    assert!(all.len() >= 2);

    let beginner = get(&router, "/api/lessons?level=beginner&lang=fr")
        .json_body()
        .unwrap();
    let beginner = beginner.as_array().unwrap();
    assert!(!beginner.is_empty());
    assert!(beginner.iter().all(|l| l["level"] == "Beginner"));
    assert_eq!(beginner[0]["title"], "Introduction à Python");
}

#[test]
fn test_every_response_allows_any_origin() {
    let router = router();
    let mut wire = Vec::new();
    get(&router, "/api/lessons/999").write_to(&mut wire).unwrap();
    let text = String::from_utf8(wire).unwrap();
    assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));

    let preflight = router.handle(&Request::new("OPTIONS", "/api/lessons", "").unwrap());
    assert_eq!(preflight.status, 204);
}

#[test]
fn test_metrics_reflect_traffic() {
    let router = router();
    post_run(&router, json!({"code": "print(1)"}));
    post_run(&router, json!({"code": "eval('1')"}));

    let text = String::from_utf8(get(&router, "/metrics").body).unwrap();
    assert!(text.contains("learnbox_submissions_total 2"));
    assert!(text.contains("learnbox_outcomes_total{kind=\"success\"} 1"));
    assert!(text.contains("learnbox_outcomes_total{kind=\"blocked\"} 1"));
    assert!(text.contains("learnbox_runtime_invocations_total 1"));
}
