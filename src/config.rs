use anyhow::{Context, bail};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::service::attendance::RosterPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    MySql,
    Local,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(StoreBackend::MySql),
            "local" => Ok(StoreBackend::Local),
            other => Err(format!("unknown store backend '{other}', expected mysql or local")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: String,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_init_schema: bool,
    pub local_store_path: PathBuf,

    pub jwt_secret: String,
    pub access_token_ttl: usize,
    pub reset_token_ttl: i64,
    pub store_timeout: Duration,
    pub public_base_url: String,
    pub api_prefix: String,
    pub roster_policy: RosterPolicy,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_signup_per_min: u32,
    pub rate_password_per_min: u32,
    pub rate_protected_per_min: u32,

    // Mail; `None` logs outgoing mail instead of sending it
    pub smtp: Option<SmtpConfig>,
    pub mail_from: String,

    pub log_dir: String,
    pub log_level: String,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}='{raw}' is invalid: {e}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();

        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.trim().is_empty() {
            bail!("JWT_SECRET must not be empty");
        }

        let store_backend: StoreBackend = var_or("STORE_BACKEND", "mysql")
            .parse()
            .map_err(anyhow::Error::msg)?;
        let database_url = env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::MySql && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORE_BACKEND=mysql");
        }

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpConfig {
                host,
                port: parsed_or("SMTP_PORT", 465)?,
                username: env::var("SMTP_USERNAME").ok(),
                password: env::var("SMTP_PASSWORD").ok(),
            }),
            _ => None,
        };

        Ok(Self {
            server_addr: var_or("SERVER_ADDR", "127.0.0.1:3000"),
            store_backend,
            database_url,
            db_max_connections: parsed_or("DB_MAX_CONNECTIONS", 10)?,
            db_init_schema: parsed_or("DB_INIT_SCHEMA", false)?,
            local_store_path: PathBuf::from(var_or("LOCAL_STORE_PATH", "edumanage-data.json")),

            jwt_secret,
            access_token_ttl: parsed_or("ACCESS_TOKEN_TTL", 86_400)?, // default 1 day
            reset_token_ttl: parsed_or("RESET_TOKEN_TTL", 3_600)?,    // default 1 hour
            store_timeout: Duration::from_millis(parsed_or("STORE_TIMEOUT_MS", 5_000)?),
            public_base_url: var_or("PUBLIC_BASE_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            api_prefix: var_or("API_PREFIX", "/api"),
            roster_policy: var_or("ROSTER_POLICY", "partial")
                .parse()
                .map_err(anyhow::Error::msg)?,

            rate_login_per_min: parsed_or("RATE_LOGIN_PER_MIN", 60)?,
            rate_signup_per_min: parsed_or("RATE_SIGNUP_PER_MIN", 30)?,
            rate_password_per_min: parsed_or("RATE_PASSWORD_PER_MIN", 30)?,
            rate_protected_per_min: parsed_or("RATE_PROTECTED_PER_MIN", 1000)?,

            smtp,
            mail_from: var_or("MAIL_FROM", "EduManage <no-reply@edumanage.local>"),

            log_dir: var_or("LOG_DIR", "logs"),
            log_level: var_or("LOG_LEVEL", "debug"),
        })
    }
}

impl Default for Config {
    /// Local backend, logging mailer, development secret.
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3000".to_string(),
            store_backend: StoreBackend::Local,
            database_url: None,
            db_max_connections: 10,
            db_init_schema: false,
            local_store_path: PathBuf::from("edumanage-data.json"),
            jwt_secret: "dev-secret-change-me".to_string(),
            access_token_ttl: 86_400,
            reset_token_ttl: 3_600,
            store_timeout: Duration::from_millis(5_000),
            public_base_url: "http://localhost:3000".to_string(),
            api_prefix: "/api".to_string(),
            roster_policy: RosterPolicy::AllowPartial,
            rate_login_per_min: 60,
            rate_signup_per_min: 30,
            rate_password_per_min: 30,
            rate_protected_per_min: 1000,
            smtp: None,
            mail_from: "EduManage <no-reply@edumanage.local>".to_string(),
            log_dir: "logs".to_string(),
            log_level: "debug".to_string(),
        }
    }
}
