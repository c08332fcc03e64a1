/// Request routing for the learner-facing API.
///
/// Pure with respect to I/O: a [`Request`] goes in, a [`Response`] comes
/// out, so every route can be exercised without a socket.
use super::request::Request;
use super::response::{Response, ALLOWED_METHODS, PROMETHEUS_CONTENT_TYPE};
use crate::config::types::{CodeSubmission, ExecutionOutcome};
use crate::exec::executor::Sandbox;
use crate::lessons::{LessonFilter, LessonStore, DEFAULT_LOCALE};
use crate::observability::metrics::MetricsRegistry;
use log::{debug, error};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const SERVICE_NAME: &str = "learnbox";

/// Shown to the caller instead of any host failure detail
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error, please try again";

const LESSON_PREFIX: &str = "/api/lessons/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Root,
    Health,
    Metrics,
    Run,
    Lessons,
    Lesson,
}

impl Route {
    fn resolve(path: &str) -> Option<Self> {
        match path {
            "/" => Some(Route::Root),
            "/health" => Some(Route::Health),
            "/metrics" => Some(Route::Metrics),
            "/api/run" => Some(Route::Run),
            "/api/lessons" => Some(Route::Lessons),
            _ if path.starts_with(LESSON_PREFIX) && path.len() > LESSON_PREFIX.len() => {
                Some(Route::Lesson)
            }
            _ => None,
        }
    }

    fn method(&self) -> &'static str {
        match self {
            Route::Run => "POST",
            _ => "GET",
        }
    }
}

pub struct Router {
    sandbox: Arc<Sandbox>,
    lessons: Arc<dyn LessonStore>,
}

impl Router {
    pub fn new(sandbox: Arc<Sandbox>, lessons: Arc<dyn LessonStore>) -> Self {
        Self { sandbox, lessons }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        self.sandbox.metrics()
    }

    pub fn handle(&self, request: &Request) -> Response {
        let response = self.dispatch(request);
        self.metrics().record_http_status(response.status);
        debug!("{} {} -> {}", request.method, request.path, response.status);
        response
    }

    fn dispatch(&self, request: &Request) -> Response {
        if request.method == "OPTIONS" {
            return Response::preflight();
        }
        let Some(route) = Route::resolve(&request.path) else {
            return Response::error(404, "not found");
        };
        if request.method != route.method() {
            return Response::error(405, "method not allowed")
                .with_header("Allow", format!("{}, OPTIONS", route.method()));
        }

        match route {
            Route::Root => Response::json(200, &json!({ "status": "ok", "service": SERVICE_NAME })),
            Route::Health => Response::json(200, &json!({ "ok": true, "service": SERVICE_NAME })),
            Route::Metrics => {
                Response::text(200, PROMETHEUS_CONTENT_TYPE, self.metrics().export_prometheus())
            }
            Route::Run => self.run(request),
            Route::Lessons => self.list_lessons(request),
            Route::Lesson => self.get_lesson(request),
        }
    }

    fn run(&self, request: &Request) -> Response {
        let code = match submitted_code(&request.body) {
            Ok(code) => code,
            Err(message) => return Response::error(400, message),
        };

        match self.sandbox.submit(CodeSubmission::new(code)) {
            Ok(outcome) => run_response(&outcome),
            Err(e) => {
                error!("Run failed on the host side: {}", e);
                Response::json(500, &json!({ "output": "", "error": INTERNAL_ERROR_MESSAGE }))
            }
        }
    }

    fn list_lessons(&self, request: &Request) -> Response {
        let filter = LessonFilter::new(
            request.query_param("level").map(str::to_string),
            request.query_param("lang").map(str::to_string),
        );
        let lessons = self.lessons.list(&filter);
        match serde_json::to_value(lessons) {
            Ok(value) => Response::json(200, &value),
            Err(e) => {
                error!("Failed to encode lessons: {}", e);
                Response::error(500, INTERNAL_ERROR_MESSAGE)
            }
        }
    }

    fn get_lesson(&self, request: &Request) -> Response {
        let locale = request
            .query_param("lang")
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(DEFAULT_LOCALE);
        let lesson = request.path[LESSON_PREFIX.len()..]
            .parse::<u32>()
            .ok()
            .and_then(|id| self.lessons.get(id, locale));
        let Some(lesson) = lesson else {
            return Response::error(404, "not found");
        };
        match serde_json::to_value(lesson) {
            Ok(value) => Response::json(200, &value),
            Err(e) => {
                error!("Failed to encode lesson: {}", e);
                Response::error(500, INTERNAL_ERROR_MESSAGE)
            }
        }
    }
}

/// Extract `code` from a run body. A missing field is the empty program.
fn submitted_code(body: &[u8]) -> Result<String, &'static str> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| "request body must be a JSON object")?;
    let Value::Object(fields) = value else {
        return Err("request body must be a JSON object");
    };
    match fields.get("code") {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(code)) => Ok(code.clone()),
        Some(_) => Err("`code` must be a string"),
    }
}

/// Status and `{output, error}` body for a classified outcome
pub fn run_response(outcome: &ExecutionOutcome) -> Response {
    let status = if outcome.is_success() { 200 } else { 400 };
    Response::json(status, &run_body(outcome))
}

pub fn run_body(outcome: &ExecutionOutcome) -> Value {
    let mut body = Map::new();
    body.insert("output".to_string(), Value::from(outcome.output_text.as_str()));
    body.insert(
        "error".to_string(),
        Value::from(outcome.diagnostic.as_deref().unwrap_or_default()),
    );
    if outcome.truncated {
        body.insert("truncated".to_string(), Value::Bool(true));
    }
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::descriptor::PolicyDescriptor;
    use crate::config::types::OutcomeKind;
    use crate::core::governor::ThreadGovernor;
    use crate::lessons::StaticLessonStore;

    fn router() -> Router {
        let sandbox = Sandbox::new(PolicyDescriptor::default(), Arc::new(ThreadGovernor::new()));
        Router::new(
            Arc::new(sandbox),
            Arc::new(StaticLessonStore::bundled().unwrap()),
        )
    }

    fn get(router: &Router, target: &str) -> Response {
        router.handle(&Request::new("GET", target, "").unwrap())
    }

    #[test]
    fn test_submitted_code() {
        assert_eq!(submitted_code(br#"{"code": "x = 1"}"#), Ok("x = 1".to_string()));
        assert_eq!(submitted_code(b"{}"), Ok(String::new()));
        assert_eq!(submitted_code(br#"{"code": null}"#), Ok(String::new()));
        assert!(submitted_code(br#"{"code": 5}"#).is_err());
        assert!(submitted_code(b"[1, 2]").is_err());
        assert!(submitted_code(b"").is_err());
        assert!(submitted_code(b"code=1").is_err());
    }

    #[test]
    fn test_run_body_shape() {
        let outcome = ExecutionOutcome {
            kind: OutcomeKind::Success,
            output_text: "xx".to_string(),
            diagnostic: None,
            truncated: true,
        };
        assert_eq!(
            run_body(&outcome),
            json!({"output": "xx", "error": "", "truncated": true})
        );

        let fault = ExecutionOutcome {
            kind: OutcomeKind::RuntimeFault,
            output_text: String::new(),
            diagnostic: Some("NameError: boom".to_string()),
            truncated: false,
        };
        let response = run_response(&fault);
        assert_eq!(response.status, 400);
        assert_eq!(
            response.json_body(),
            Some(json!({"output": "", "error": "NameError: boom"}))
        );
    }

    #[test]
    fn test_service_routes() {
        let router = router();
        assert_eq!(
            get(&router, "/").json_body(),
            Some(json!({"status": "ok", "service": "learnbox"}))
        );
        assert_eq!(
            get(&router, "/health").json_body(),
            Some(json!({"ok": true, "service": "learnbox"}))
        );
        let metrics = get(&router, "/metrics");
        assert_eq!(metrics.content_type, Some(PROMETHEUS_CONTENT_TYPE));
        assert!(String::from_utf8_lossy(&metrics.body).contains("learnbox_http_requests_total"));
    }

    #[test]
    fn test_routing_errors() {
        let router = router();
        assert_eq!(get(&router, "/nope").status, 404);
        assert_eq!(get(&router, "/api/lessons/").status, 404);
        assert_eq!(get(&router, "/api/run").status, 405);

        let post = router.handle(&Request::new("POST", "/health", "").unwrap());
        assert_eq!(post.status, 405);
        assert!(post.headers.iter().any(|(k, v)| *k == "Allow" && v == "GET, OPTIONS"));

        let preflight = router.handle(&Request::new("OPTIONS", "/api/run", "").unwrap());
        assert_eq!(preflight.status, 204);
        assert!(preflight
            .headers
            .iter()
            .any(|(_, v)| v.as_str() == ALLOWED_METHODS));
    }

    #[test]
    fn test_http_status_metrics() {
        let router = router();
        get(&router, "/health");
        get(&router, "/missing");
        assert_eq!(router.metrics().http_requests_2xx.get(), 1);
        assert_eq!(router.metrics().http_requests_4xx.get(), 1);
    }
}
