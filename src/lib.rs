pub mod app;
pub mod contact;
pub mod error;
pub mod pages;
pub mod router;
pub mod settings;
pub mod template;

pub use app::{AppState, build_router};
pub use contact::{ContactSubmission, ContactValidator, SubmissionValidator, Verdict, validate_contact};
pub use error::{Error, Result};
