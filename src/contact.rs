//! Contact form validation.
//!
//! A submission is built from raw form values and checked in one stateless
//! pass. Every field is checked and all failures are reported together; a
//! missing field only reports that it is required.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

pub const REQUIRED_MESSAGE: &str = "This field is required.";
pub const EMAIL_LENGTH_MESSAGE: &str = "Field must be between 6 and 35 characters long.";
pub const MESSAGE_LENGTH_MESSAGE: &str = "Field must be between 6 and 20000 characters long.";
pub const EMAIL_FORMAT_MESSAGE: &str = "Invalid email address.";

/// Form fields in the order they are rendered.
pub const FIELDS: [&str; 3] = ["name", "email", "message"];

/// The `validator` email rule accepts dotless domains such as `localhost`.
static DOTTED_DOMAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("valid email domain regex"));

/// A contact form submission. `None` marks a missing field; the rules for
/// each field are declared on it and checked independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ContactSubmission {
    #[validate(required(message = "This field is required."))]
    pub name: Option<String>,

    #[validate(
        required(message = "This field is required."),
        length(min = 6, max = 35, message = "Field must be between 6 and 35 characters long."),
        email(message = "Invalid email address."),
        regex(path = *DOTTED_DOMAIN, message = "Invalid email address.")
    )]
    pub email: Option<String>,

    #[validate(
        required(message = "This field is required."),
        length(min = 6, max = 20000, message = "Field must be between 6 and 20000 characters long.")
    )]
    pub message: Option<String>,
}

impl ContactSubmission {
    /// Empty and whitespace-only values are treated as absent.
    pub fn new<S: Into<String>>(name: Option<S>, email: Option<S>, message: Option<S>) -> Self {
        ContactSubmission {
            name: present(name),
            email: present(email),
            message: present(message),
        }
    }

    /// Builds a submission from decoded form fields, ignoring unknown keys.
    pub fn from_form(fields: &HashMap<String, String>) -> Self {
        Self::new(
            fields.get("name").cloned(),
            fields.get("email").cloned(),
            fields.get("message").cloned(),
        )
    }

    /// Runs every field rule and collects the outcome.
    pub fn verdict(&self) -> Verdict {
        match self.validate() {
            Ok(()) => Verdict::accepted(),
            Err(errors) => Verdict::from(errors),
        }
    }
}

fn present<S: Into<String>>(value: Option<S>) -> Option<String> {
    value
        .map(Into::into)
        .filter(|value| !value.trim().is_empty())
}

/// Accept/reject outcome with per-field messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub valid: bool,
    pub errors: BTreeMap<String, Vec<String>>,
}

impl Verdict {
    /// A verdict with no errors.
    pub fn accepted() -> Self {
        Verdict {
            valid: true,
            errors: BTreeMap::new(),
        }
    }

    /// True when every field passed.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Messages for one field, empty if the field passed.
    pub fn field_errors(&self, field: &str) -> &[String] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl From<ValidationErrors> for Verdict {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (field, field_errors) in errors.field_errors() {
            let messages = fields.entry(field.to_string()).or_default();
            for error in field_errors.iter() {
                let message = error
                    .message
                    .as_ref()
                    .map(|message| message.to_string())
                    .unwrap_or_else(|| error.code.to_string());
                if !messages.contains(&message) {
                    messages.push(message);
                }
            }
        }
        fields.retain(|_, messages| !messages.is_empty());

        Verdict {
            valid: fields.is_empty(),
            errors: fields,
        }
    }
}

/// Validation as an injectable dependency for request handlers.
pub trait SubmissionValidator: Send + Sync {
    /// Checks one submission. Never fails; rejections are part of the verdict.
    fn validate(&self, submission: &ContactSubmission) -> Verdict;
}

/// Default validator applying the contact form rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContactValidator;

impl SubmissionValidator for ContactValidator {
    fn validate(&self, submission: &ContactSubmission) -> Verdict {
        submission.verdict()
    }
}

/// Validates a raw name/email/message triple.
pub fn validate_contact(name: Option<&str>, email: Option<&str>, message: Option<&str>) -> Verdict {
    ContactSubmission::new(name, email, message).verdict()
}
