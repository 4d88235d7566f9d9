/// S3 connection settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// AWS region (default: `us-east-1`).
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, R2, ...).
    pub endpoint_url: Option<String>,
    /// Static credentials; when absent the default AWS provider chain is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default          |
    /// |------------------------|------------------|
    /// | `S3_REGION`            | `us-east-1`      |
    /// | `S3_ENDPOINT_URL`      | unset            |
    /// | `S3_ACCESS_KEY_ID`     | unset            |
    /// | `S3_SECRET_ACCESS_KEY` | unset            |
    pub fn from_env() -> Self {
        Self {
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
            endpoint_url: non_empty_var("S3_ENDPOINT_URL"),
            access_key_id: non_empty_var("S3_ACCESS_KEY_ID"),
            secret_access_key: non_empty_var("S3_SECRET_ACCESS_KEY"),
        }
    }

    /// Static credentials, only when both halves are configured.
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
