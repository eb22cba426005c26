use std::sync::Arc;

use crate::contact::{ContactValidator, SubmissionValidator};
use crate::pages;
use crate::route;
use crate::router::{Method, Router, access_log, handler};
use crate::settings::Settings;
use crate::template::Templates;

/// Shared dependencies handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub templates: Arc<Templates>,
    pub validator: Arc<dyn SubmissionValidator>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let templates = Templates::new(&settings.template.dir);
        AppState {
            settings: Arc::new(settings),
            templates: Arc::new(templates),
            validator: Arc::new(ContactValidator),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn SubmissionValidator>) -> Self {
        self.validator = validator;
        self
    }
}

/// Registers every page, the error handlers and the access log.
pub fn build_router(state: AppState) -> Router {
    let verification_pages = state.settings.verification_pages.clone();
    let mut router = Router::new(state);

    route!(router,
        GET "/" => pages::home,
        POST "/contact" => pages::contact,
    );

    for page in verification_pages {
        let path = format!("/{page}");
        router.add_route(
            Method::GET,
            &path,
            handler(move |_request, state| pages::verification(page.clone(), state)),
        );
    }

    router.set_not_found(Arc::new(pages::not_found));
    router.set_internal_error(Arc::new(pages::internal_error));
    router.add_post_middleware(access_log());
    router
}
