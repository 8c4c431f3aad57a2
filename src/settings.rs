use std::path::PathBuf;

use config::{Config, ConfigError, Environment};
use reqwest::Url;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub upload_folder: String,
    pub base_url: String,

    pub database_url: Option<String>,
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,

    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub smtp_from_email: String,

    pub github_client_id: Option<String>,
    pub github_client_secret: Option<String>,
    pub oauth_redirect_base: Option<String>,

    pub download_token_ttl_hours: i64,
    pub earn_amount_cents: i64,
}

impl Settings {
    /// Reads settings from the process environment, falling back to
    /// development defaults for everything that is not set.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_source(Environment::default().try_parsing(true))
    }

    fn from_source(env: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("upload_folder", "uploads")?
            .set_default("base_url", "http://localhost:8000")?
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "postgres")?
            .set_default("db_password", "postgres")?
            .set_default("db_name", "marketplace")?
            .set_default("smtp_port", 587)?
            .set_default("smtp_from_email", "orders@digital-marketplace.com")?
            .set_default("download_token_ttl_hours", 24)?
            .set_default("earn_amount_cents", 1000)?
            .add_source(env)
            .build()?
            .try_deserialize()
    }

    /// `DATABASE_URL` wins; otherwise the URL is assembled from the `DB_*` parts
    /// with the credentials percent-encoded.
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) if !url.trim().is_empty() => url.clone(),
            _ => self.assembled_database_url(),
        }
    }

    fn assembled_database_url(&self) -> String {
        let plain = format!(
            "postgres://{}:{}/{}",
            self.db_host, self.db_port, self.db_name
        );
        let mut url = match Url::parse(&plain) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(error = %err, "DB_HOST or DB_NAME do not form a valid URL");
                return format!(
                    "postgres://{}:{}@{}:{}/{}",
                    self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
                );
            }
        };
        // Only fails for URLs without a host, which `plain` always has.
        let _ = url.set_username(&self.db_user);
        let _ = url.set_password(Some(&self.db_password));
        url.to_string()
    }

    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.upload_folder)
    }

    pub fn oauth_redirect_url(&self) -> String {
        let base = self
            .oauth_redirect_base
            .as_deref()
            .unwrap_or(&self.base_url)
            .trim_end_matches('/');
        format!("{}/auth/github/callback", base)
    }

    pub fn download_url(&self, token: &str) -> String {
        format!("{}/download/{}", self.base_url.trim_end_matches('/'), token)
    }
}
