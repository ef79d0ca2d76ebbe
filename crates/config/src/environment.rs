use std::env;

/// Deployment environment the server runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Detect the environment from `ENVIRONMENT_MODE` (default: dev).
    pub fn detect() -> Self {
        match env::var("ENVIRONMENT_MODE").as_deref() {
            Ok("prod") | Ok("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Value propagated to the scheduler as `override_env`
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "dev",
            Environment::Production => "prod",
        }
    }
}
