use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

/// Registration policy: which addresses may hold elevated roles, which
/// domain counts as institutional, and how long a pending account may stay
/// unverified before the sweep removes it.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    pub email_domain: String,
    pub staff_emails: Vec<String>,
    pub librarian_emails: Vec<String>,
    pub verification_window_minutes: i64,
    pub sweep_interval_seconds: u64,
}

impl RegistrationConfig {
    pub fn verification_window(&self) -> time::Duration {
        time::Duration::minutes(self.verification_window_minutes)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub cache_ttl_seconds: u64,
    pub jwt: JwtConfig,
    pub smtp: SmtpConfig,
    pub storage: StorageConfig,
    pub registration: RegistrationConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let cache_ttl_seconds = env_parse("CACHE_TTL_SECONDS", 3600);

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "unilib".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "unilib-users".into()),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 15),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };

        let smtp = SmtpConfig {
            host: std::env::var("SMTP_HOST")?,
            username: std::env::var("SMTP_USERNAME")?,
            password: std::env::var("SMTP_PASSWORD")?,
            from: std::env::var("SMTP_FROM")
                .or_else(|_| std::env::var("SMTP_USERNAME"))?,
        };

        let storage = StorageConfig {
            endpoint: std::env::var("MINIO_ENDPOINT")?,
            bucket: std::env::var("MINIO_BUCKET")?,
            access_key: std::env::var("MINIO_ACCESS_KEY")?,
            secret_key: std::env::var("MINIO_SECRET_KEY")?,
        };

        let registration = RegistrationConfig {
            email_domain: std::env::var("UNIVERSITY_EMAIL_DOMAIN")
                .unwrap_or_else(|_| "university.edu".into()),
            staff_emails: env_list("STAFF_EMAILS"),
            librarian_emails: env_list("LIBRARIAN_EMAILS"),
            verification_window_minutes: env_parse("VERIFICATION_WINDOW_MINUTES", 30),
            sweep_interval_seconds: env_parse("EXPIRY_SWEEP_INTERVAL_SECONDS", 60),
        };

        Ok(Self {
            database_url,
            redis_url,
            cache_ttl_seconds,
            jwt,
            smtp,
            storage,
            registration,
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Comma-separated list, empty entries dropped.
fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
