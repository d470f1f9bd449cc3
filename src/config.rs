use crate::chat::dedup::DEFAULT_DEDUP_CAPACITY;
use crate::processor::{DEFAULT_WORKFLOW_END_MARKER, ProcessorConfig};

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub dedup_capacity: usize,
    pub workflow_end_marker: String,
    pub image_url: Option<String>,
    pub sentry_dsn: Option<String>,
    pub environment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw_values(None, None, None, None, None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_raw_values(
            std::env::var("STREAM_DEDUP_CAPACITY").ok().as_deref(),
            std::env::var("STREAM_END_MARKER").ok().as_deref(),
            std::env::var("STREAM_IMAGE_URL").ok().as_deref(),
            std::env::var("SENTRY_DSN").ok().as_deref(),
            std::env::var("ENVIRONMENT").ok().as_deref(),
        )
    }

    /// Build a Config from raw string values (as they would come from env vars).
    /// Used directly in tests to avoid mutating process-global environment.
    pub fn from_raw_values(
        dedup_capacity: Option<&str>,
        workflow_end_marker: Option<&str>,
        image_url: Option<&str>,
        sentry_dsn: Option<&str>,
        environment: Option<&str>,
    ) -> Self {
        let dedup_capacity = dedup_capacity
            .and_then(|v| v.trim().parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(DEFAULT_DEDUP_CAPACITY);

        let workflow_end_marker = workflow_end_marker
            .filter(|s| !s.trim().is_empty())
            .map(String::from)
            .unwrap_or_else(|| DEFAULT_WORKFLOW_END_MARKER.to_string());

        let image_url = image_url.filter(|s| !s.is_empty()).map(String::from);

        let sentry_dsn = sentry_dsn.filter(|s| !s.is_empty()).map(String::from);

        let environment = environment
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| "local".to_string());

        Config {
            dedup_capacity,
            workflow_end_marker,
            image_url,
            sentry_dsn,
            environment,
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            workflow_end_marker: self.workflow_end_marker.clone(),
        }
    }
}
