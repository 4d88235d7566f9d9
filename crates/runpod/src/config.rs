use std::time::Duration;

/// Inference endpoint settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RunPodConfig {
    /// Endpoint base URL, e.g. `https://api.runpod.ai/v2/<endpoint-id>`.
    pub api_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl RunPodConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                        | Default  |
    /// |--------------------------------|----------|
    /// | `RUNPOD_API_URL`               | required |
    /// | `RUNPOD_API_KEY`               | required |
    /// | `RUNPOD_REQUEST_TIMEOUT_SECS`  | `30`     |
    ///
    /// # Panics
    ///
    /// Panics if a required variable is missing or the timeout is not a
    /// number.
    pub fn from_env() -> Self {
        let api_url = std::env::var("RUNPOD_API_URL").expect("RUNPOD_API_URL must be set");
        let api_key = std::env::var("RUNPOD_API_KEY").expect("RUNPOD_API_KEY must be set");
        let timeout_secs: u64 = std::env::var("RUNPOD_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("RUNPOD_REQUEST_TIMEOUT_SECS must be a valid u64");

        Self {
            api_url,
            api_key,
            request_timeout: Duration::from_secs(timeout_secs),
        }
    }
}
