use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Provider verification pages served verbatim from the template directory.
pub const VERIFICATION_PAGES: [&str; 2] = ["google51951de21c061dc9.html", "google087c96628ea965db.html"];

/// Named configuration profile; `production` unless configured otherwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Production,
    Development,
    Testing,
}

impl Profile {
    /// Canonical lowercase name, as accepted by `PORTFOLIO_PROFILE`.
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Production => "production",
            Profile::Development => "development",
            Profile::Testing => "testing",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Profile::Production),
            "development" | "dev" => Ok(Profile::Development),
            "testing" | "test" => Ok(Profile::Testing),
            _ => Err(Error::Config {
                key: "PORTFOLIO_PROFILE".into(),
                value: s.into(),
            }),
        }
    }
}

/// Where templates live and whether to watch them.
#[derive(Clone, Debug)]
pub struct TemplateSettings {
    /// Template directory, relative to the working directory unless absolute.
    pub dir: String,
    /// Watch the directory and reload templates on change.
    pub debug: bool,
}

/// Application settings, built from a profile plus environment overrides.
#[derive(Clone, Debug)]
pub struct Settings {
    pub profile: Profile,
    pub debug: bool,
    pub host: String,
    pub port: u16,
    pub site_name: String,
    pub template: TemplateSettings,
    pub verification_pages: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::for_profile(Profile::default())
    }
}

impl Settings {
    /// Defaults for `profile`: only development enables debug and template
    /// watching, and production listens on all interfaces.
    pub fn for_profile(profile: Profile) -> Self {
        let debug = profile == Profile::Development;
        let host = match profile {
            Profile::Production => "0.0.0.0",
            Profile::Development | Profile::Testing => "127.0.0.1",
        };
        Settings {
            profile,
            debug,
            host: host.to_string(),
            port: 8000,
            site_name: "Portfolio".to_string(),
            template: TemplateSettings {
                dir: "templates".to_string(),
                debug,
            },
            verification_pages: VERIFICATION_PAGES.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Reads the profile and overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from `PORTFOLIO_*` keys resolved through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let profile = match lookup("PORTFOLIO_PROFILE") {
            Some(value) => value.parse()?,
            None => Profile::default(),
        };
        let mut settings = Settings::for_profile(profile);

        if let Some(host) = lookup("PORTFOLIO_HOST") {
            settings.host = host;
        }
        if let Some(port) = lookup("PORTFOLIO_PORT") {
            settings.port = port.trim().parse().map_err(|_| Error::Config {
                key: "PORTFOLIO_PORT".into(),
                value: port.clone(),
            })?;
        }
        if let Some(dir) = lookup("PORTFOLIO_TEMPLATE_DIR") {
            settings.template.dir = dir;
        }
        if let Some(name) = lookup("PORTFOLIO_SITE_NAME") {
            settings.site_name = name;
        }
        Ok(settings)
    }

    /// `host:port` to bind.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Default log spec for the profile, used when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match self.profile {
            Profile::Production => "info",
            Profile::Development => "debug",
            Profile::Testing => "warn",
        }
    }
}
