use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Runtime environment tag reported by `/health` (e.g. "production").
    pub app_env: String,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    /// Local directory that buffers uploads before they reach the bucket.
    pub upload_dir: String,
    pub upload_max_bytes: usize,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl: bool,
    pub pool_max: u32,
    pub pool_min: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

// Hand-written so the password never reaches the startup log.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("name", &self.name)
            .field("ssl", &self.ssl)
            .field("pool_max", &self.pool_max)
            .field("pool_min", &self.pool_min)
            .field("connect_timeout", &self.connect_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct StorageConfig {
    pub bucket: String,
    /// Base of the public object URLs handed back to clients.
    pub public_base_url: String,
    /// Base of the JSON upload API.
    pub api_base_url: String,
    pub access_token: Option<String>,
    pub anonymous: bool,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket", &self.bucket)
            .field("public_base_url", &self.public_base_url)
            .field("api_base_url", &self.api_base_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Penduduk records API")]
pub struct Args {
    /// Host to bind to (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploads are buffered (overrides UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_lookup(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Build the configuration from CLI args and a variable lookup.
    ///
    /// CLI values win over looked-up values, which win over defaults.
    pub fn from_lookup<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let app_env = lookup("APP_ENV")
            .or_else(|| lookup("NODE_ENV"))
            .unwrap_or_else(|| "development".into());
        let production = app_env == "production";

        let env_port = parse_var(&lookup, "PORT", 8080u16)?;

        let database = DatabaseConfig {
            host: var("DB_HOST", "localhost"),
            port: parse_var(&lookup, "DB_PORT", 5432u16)?,
            user: var("DB_USER", "postgres"),
            password: var("DB_PASSWORD", "postgres"),
            name: var("DB_NAME", "uas_cloud"),
            ssl: parse_bool(&lookup, "DB_SSL", production)?,
            pool_max: parse_var(&lookup, "DB_POOL_MAX", 10u32)?,
            pool_min: parse_var(&lookup, "DB_POOL_MIN", 2u32)?,
            connect_timeout: Duration::from_millis(parse_var(
                &lookup,
                "DB_CONNECT_TIMEOUT_MS",
                10_000u64,
            )?),
            idle_timeout: Duration::from_millis(parse_var(
                &lookup,
                "DB_IDLE_TIMEOUT_MS",
                30_000u64,
            )?),
        };
        if database.pool_min > database.pool_max {
            anyhow::bail!(
                "DB_POOL_MIN ({}) must not exceed DB_POOL_MAX ({})",
                database.pool_min,
                database.pool_max
            );
        }

        let storage = StorageConfig {
            bucket: var("BUCKET_NAME", "bucket_uas"),
            public_base_url: trim_base(var(
                "STORAGE_PUBLIC_BASE_URL",
                "https://storage.googleapis.com",
            )),
            api_base_url: trim_base(var(
                "STORAGE_API_BASE_URL",
                "https://storage.googleapis.com",
            )),
            access_token: lookup("GCS_ACCESS_TOKEN").filter(|t| !t.is_empty()),
            anonymous: parse_bool(&lookup, "GCS_ANONYMOUS", false)?,
        };

        Ok(Self {
            host: args.host.unwrap_or_else(|| var("HOST", "0.0.0.0")),
            port: args.port.unwrap_or(env_port),
            app_env,
            database,
            storage,
            upload_dir: args
                .upload_dir
                .unwrap_or_else(|| var("UPLOAD_DIR", "./uploads")),
            upload_max_bytes: parse_var(&lookup, "UPLOAD_MAX_BYTES", 10 * 1024 * 1024usize)?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("parsing {} value `{}`: expected a boolean", key, other),
        },
        None => Ok(default),
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
