use std::collections::HashMap;
use std::sync::Arc;

use portfolio::contact::{ContactSubmission, REQUIRED_MESSAGE, SubmissionValidator, Verdict};
use portfolio::router::{Method, Request, Router};
use portfolio::settings::{Profile, Settings};
use portfolio::{AppState, build_router};

const TEMPLATE_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/templates");

fn settings_with_dir(dir: &str) -> Settings {
    let mut settings = Settings::for_profile(Profile::Testing);
    settings.template.dir = dir.to_string();
    settings.site_name = "Jane Doe".to_string();
    settings
}

fn app() -> Router {
    build_router(AppState::new(settings_with_dir(TEMPLATE_DIR)))
}

fn contact_form(name: &str, email: &str, message: &str) -> HashMap<String, String> {
    HashMap::from([
        ("name".to_string(), name.to_string()),
        ("email".to_string(), email.to_string()),
        ("message".to_string(), message.to_string()),
    ])
}

#[tokio::test]
async fn test_home_page_renders() {
    let resp = app().dispatch(Request::get("/")).await;
    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.headers.get("Content-Type").unwrap(), "text/html; charset=utf-8");
    assert!(resp.body.contains("Jane Doe"));
    assert!(resp.body.contains("action=\"/contact\""));
    assert!(!resp.body.contains("class=\"errors\""));
}

#[tokio::test]
async fn test_verification_pages_render() {
    let app = app();
    for page in ["google51951de21c061dc9.html", "google087c96628ea965db.html"] {
        let resp = app.dispatch(Request::get(format!("/{page}"))).await;
        assert_eq!(resp.status_code, 200, "page {page}");
        assert!(resp.body.contains(page));
    }
}

#[tokio::test]
async fn test_unknown_path_renders_404_page() {
    let resp = app().dispatch(Request::get("/nowhere")).await;
    assert_eq!(resp.status_code, 404);
    assert!(resp.body.contains("Page not found"));
}

#[tokio::test]
async fn test_home_render_failure_maps_to_500_page() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("500.html"), "<h1>error page</h1>").unwrap();
    std::fs::write(dir.path().join("home.html"), "{% if broken %}").unwrap();

    let app = build_router(AppState::new(settings_with_dir(dir.path().to_str().unwrap())));
    let resp = app.dispatch(Request::get("/")).await;
    assert_eq!(resp.status_code, 500);
    assert_eq!(resp.body, "<h1>error page</h1>");
}

#[tokio::test]
async fn test_missing_error_templates_fall_back_to_plain_text() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(AppState::new(settings_with_dir(dir.path().to_str().unwrap())));

    let resp = app.dispatch(Request::get("/")).await;
    assert_eq!(resp.status_code, 500);
    assert!(resp.body.contains("500"));

    let resp = app.dispatch(Request::get("/nowhere")).await;
    assert_eq!(resp.status_code, 404);
    assert!(resp.body.contains("404"));
}

#[tokio::test]
async fn test_valid_contact_submission_is_acknowledged() {
    let form = contact_form("Alice", "a@b.com", "Hello there");
    let resp = app().dispatch(Request::post("/contact").with_form(form)).await;
    assert_eq!(resp.status_code, 200);
    assert!(resp.body.contains("Thanks for your message."));
    assert!(!resp.body.contains("class=\"errors\""));
}

#[tokio::test]
async fn test_invalid_contact_submission_redisplays_form() {
    let form = contact_form("", "bob@example.com", "hi");
    let resp = app().dispatch(Request::post("/contact").with_form(form)).await;
    assert_eq!(resp.status_code, 422);
    assert!(resp.body.contains(REQUIRED_MESSAGE));
    assert!(resp.body.contains("Field must be between 6 and 20000 characters long."));
    assert!(resp.body.contains("value=\"bob@example.com\""));
    assert!(!resp.body.contains("Thanks for your message."));
}

#[tokio::test]
async fn test_submitted_values_are_escaped() {
    let form = contact_form("<script>", "x", "Hello there");
    let resp = app().dispatch(Request::post("/contact").with_form(form)).await;
    assert_eq!(resp.status_code, 422);
    assert!(resp.body.contains("&lt;script&gt;"));
    assert!(!resp.body.contains("<script>"));
}

#[tokio::test]
async fn test_contact_json_verdict() {
    let request = Request::post("/contact")
        .with_form(contact_form("Bob", "x", "Hello there"))
        .with_header("Accept", "application/json");
    let resp = app().dispatch(request).await;
    assert_eq!(resp.status_code, 422);
    let body: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
    assert_eq!(body["valid"], false);
    assert!(body["errors"]["email"].as_array().is_some_and(|errors| !errors.is_empty()));
    assert!(body["errors"].get("name").is_none());
}

#[tokio::test]
async fn test_get_contact_is_method_not_allowed() {
    let resp = app().dispatch(Request::get("/contact")).await;
    assert_eq!(resp.status_code, 405);
}

struct RejectAll;

impl SubmissionValidator for RejectAll {
    fn validate(&self, _submission: &ContactSubmission) -> Verdict {
        Verdict {
            valid: false,
            errors: [("name".to_string(), vec!["Rejected.".to_string()])].into(),
        }
    }
}

#[tokio::test]
async fn test_contact_uses_injected_validator() {
    let state = AppState::new(settings_with_dir(TEMPLATE_DIR)).with_validator(Arc::new(RejectAll));
    let form = contact_form("Alice", "a@b.com", "Hello there");
    let resp = build_router(state)
        .dispatch(Request::post("/contact").with_form(form))
        .await;
    assert_eq!(resp.status_code, 422);
    assert!(resp.body.contains("Rejected."));
}

#[tokio::test]
async fn test_head_is_served_by_get_routes_without_body() {
    let app = app();
    let resp = app.dispatch(Request::new(Method::HEAD, "/")).await;
    assert_eq!(resp.status_code, 200);
    assert!(resp.body.is_empty());
    assert_eq!(resp.headers.get("Content-Type").unwrap(), "text/html; charset=utf-8");

    let resp = app
        .dispatch(Request::new(Method::HEAD, "/google51951de21c061dc9.html"))
        .await;
    assert_eq!(resp.status_code, 200);

    let resp = app.dispatch(Request::new(Method::HEAD, "/nowhere")).await;
    assert_eq!(resp.status_code, 404);
    assert!(resp.body.is_empty());
}

#[tokio::test]
async fn test_head_on_post_only_route_is_method_not_allowed() {
    let resp = app().dispatch(Request::new(Method::HEAD, "/contact")).await;
    assert_eq!(resp.status_code, 405);
}
