/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Maximum number of files accepted by one upload (default: `50`).
    pub max_images: usize,
    /// Maximum total upload size in bytes (default: 500 MiB).
    pub max_upload_size: u64,
    /// Age after which upload directories are purged (default: `7`).
    pub upload_retention_days: u64,
    /// Age after which result directories are purged (default: `30`).
    pub result_retention_days: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                                       |
    /// |-------------------------|-----------------------------------------------|
    /// | `HOST`                  | `0.0.0.0`                                     |
    /// | `PORT`                  | `8000`                                        |
    /// | `CORS_ORIGINS`          | `http://localhost:8000,http://localhost:3000` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                                          |
    /// | `MAX_IMAGES`            | `50`                                          |
    /// | `MAX_UPLOAD_SIZE`       | `524288000`                                   |
    /// | `UPLOAD_RETENTION_DAYS` | `7`                                           |
    /// | `RESULT_RETENTION_DAYS` | `30`                                          |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:8000,http://localhost:3000".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let max_images: usize = std::env::var("MAX_IMAGES")
            .unwrap_or_else(|_| "50".into())
            .parse()
            .expect("MAX_IMAGES must be a valid usize");

        let max_upload_size: u64 = std::env::var("MAX_UPLOAD_SIZE")
            .unwrap_or_else(|_| "524288000".into())
            .parse()
            .expect("MAX_UPLOAD_SIZE must be a valid u64");

        let upload_retention_days: u64 = std::env::var("UPLOAD_RETENTION_DAYS")
            .unwrap_or_else(|_| "7".into())
            .parse()
            .expect("UPLOAD_RETENTION_DAYS must be a valid u64");

        let result_retention_days: u64 = std::env::var("RESULT_RETENTION_DAYS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("RESULT_RETENTION_DAYS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            max_images,
            max_upload_size,
            upload_retention_days,
            result_retention_days,
        }
    }
}
