//! Page handlers.

use std::collections::HashMap;

use chrono::Datelike;
use log::{error, info};

use crate::app::AppState;
use crate::contact::{ContactSubmission, FIELDS, Verdict};
use crate::router::{HandlerResult, Request, Response};
use crate::template::{Context, TemplateValue};

fn base_context(state: &AppState) -> Context {
    let mut context = Context::new();
    context.insert("site_name".into(), state.settings.site_name.as_str().into());
    context.insert("year".into(), chrono::Local::now().year().to_string().into());
    context
}

/// Context for the contact form: submitted values and per-field messages.
fn form_context(context: &mut Context, submission: &ContactSubmission, verdict: &Verdict) {
    let values = [&submission.name, &submission.email, &submission.message];
    let form: HashMap<String, TemplateValue> = FIELDS
        .iter()
        .zip(values)
        .map(|(field, value)| (field.to_string(), value.clone().unwrap_or_default().into()))
        .collect();
    let errors: HashMap<String, TemplateValue> = FIELDS
        .iter()
        .map(|field| (field.to_string(), verdict.field_errors(field).to_vec().into()))
        .collect();

    context.insert("form".into(), form.into());
    context.insert("errors".into(), errors.into());
}

pub async fn home(_request: Request, state: AppState) -> HandlerResult {
    let mut context = base_context(&state);
    form_context(&mut context, &ContactSubmission::default(), &Verdict::accepted());
    Ok(Response::html(state.templates.render("home.html", &context)?))
}

/// Validates a contact submission and redisplays the form with the outcome.
/// Nothing is sent or stored.
pub async fn contact(request: Request, state: AppState) -> HandlerResult {
    let submission = ContactSubmission::from_form(&request.form);
    let verdict = state.validator.validate(&submission);
    let status = if verdict.is_valid() { 200 } else { 422 };

    if verdict.is_valid() {
        info!("Accepted contact submission");
    } else {
        info!(
            "Rejected contact submission: {:?}",
            verdict.errors.keys().collect::<Vec<_>>()
        );
    }

    if request.accepts_json() {
        return Ok(Response::json(&verdict, status));
    }

    let mut context = base_context(&state);
    form_context(&mut context, &submission, &verdict);
    context.insert("contact_accepted".into(), verdict.is_valid().into());
    let body = state.templates.render("home.html", &context)?;
    Ok(Response::html(body).with_status(status))
}

/// Provider verification page, rendered from the template of the same name.
pub async fn verification(page: String, state: AppState) -> HandlerResult {
    Ok(Response::html(state.templates.render(&page, &Context::new())?))
}

pub fn not_found(state: &AppState) -> Response {
    error_page(state, "404.html", 404)
}

pub fn internal_error(state: &AppState) -> Response {
    error_page(state, "500.html", 500)
}

fn error_page(state: &AppState, template: &str, status: u16) -> Response {
    match state.templates.render(template, &base_context(state)) {
        Ok(body) => Response::html(body).with_status(status),
        Err(err) => {
            error!("Failed to render {}: {}", template, err);
            match status {
                404 => Response::not_found(),
                _ => Response::internal_error(),
            }
        }
    }
}
