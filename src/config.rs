use hyper::Uri;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::supervisor::ServiceSpec;

/// Global configuration for the gateway
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener and outbound client settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Backend process supervision
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// The four backend services
    #[serde(default)]
    pub backends: BackendsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen port (default: 5000, overridden by `PORT`)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Maximum accepted JSON request body in bytes (default: 100 KiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Maximum JSON response accepted from a backend in bytes (default: 16 MiB)
    #[serde(default = "default_max_backend_response_bytes")]
    pub max_backend_response_bytes: usize,

    /// Optional cap on how long to wait for a backend's response headers.
    /// Unset means no gateway-side timeout.
    pub request_timeout_secs: Option<u64>,

    /// Maximum idle connections kept per backend (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,

    /// Bearer credential for the external inference API (`HF_API_TOKEN`).
    /// Not sent to any of the local backends.
    pub hf_api_token: Option<String>,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    /// `Authorization` header value for the inference API, if a token is configured
    pub fn inference_auth_header(&self) -> Option<String> {
        self.hf_api_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| format!("Bearer {}", t))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            max_body_bytes: default_max_body_bytes(),
            max_backend_response_bytes: default_max_backend_response_bytes(),
            request_timeout_secs: None,
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            hf_api_token: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorConfig {
    /// Launch the backend scripts at startup (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interpreter used to run each script (default: python)
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Working directory for the scripts (default: inherited)
    pub working_dir: Option<String>,

    /// Grace period in seconds between SIGTERM and SIGKILL on shutdown
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period_secs: u64,

    /// Number of recent output lines kept per process
    #[serde(default = "default_log_buffer_lines")]
    pub log_buffer_lines: usize,
}

impl SupervisorConfig {
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interpreter: default_interpreter(),
            working_dir: None,
            shutdown_grace_period_secs: default_shutdown_grace_period(),
            log_buffer_lines: default_log_buffer_lines(),
        }
    }
}

/// One backend service: the script that runs it and the URL it answers on
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BackendConfig {
    /// Script identifier passed to the interpreter
    pub script: String,

    /// Full URL of the backend endpoint
    pub url: String,
}

impl BackendConfig {
    pub fn new(script: &str, url: &str) -> Self {
        Self {
            script: script.to_string(),
            url: url.to_string(),
        }
    }

    /// Validate the backend configuration
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if self.script.trim().is_empty() {
            return Err(format!("Backend '{}': 'script' must not be empty", name));
        }

        let uri: Uri = self
            .url
            .parse()
            .map_err(|e| format!("Backend '{}': invalid url '{}': {}", name, self.url, e))?;

        if uri.scheme_str() != Some("http") {
            return Err(format!(
                "Backend '{}': url '{}' must use the http scheme",
                name, self.url
            ));
        }
        if uri.host().is_none() {
            return Err(format!("Backend '{}': url '{}' has no host", name, self.url));
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendsConfig {
    #[serde(default = "default_summarizer")]
    pub summarizer: BackendConfig,

    #[serde(default = "default_description")]
    pub description: BackendConfig,

    #[serde(default = "default_ideas")]
    pub ideas: BackendConfig,

    #[serde(default = "default_pdf")]
    pub pdf: BackendConfig,
}

impl BackendsConfig {
    /// Named backends in launch order
    pub fn named(&self) -> [(&'static str, &BackendConfig); 4] {
        [
            ("summarizer", &self.summarizer),
            ("description", &self.description),
            ("ideas", &self.ideas),
            ("pdf", &self.pdf),
        ]
    }

    /// Process specs for the supervisor, in launch order
    pub fn services(&self) -> Vec<ServiceSpec> {
        self.named()
            .into_iter()
            .map(|(name, backend)| ServiceSpec::new(name, &backend.script))
            .collect()
    }
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            summarizer: default_summarizer(),
            description: default_description(),
            ideas: default_ideas(),
            pdf: default_pdf(),
        }
    }
}

// Default value functions
fn default_listen_port() -> u16 {
    5000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_max_body_bytes() -> usize {
    100 * 1024
}

fn default_max_backend_response_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_true() -> bool {
    true
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_shutdown_grace_period() -> u64 {
    5
}

fn default_log_buffer_lines() -> usize {
    500
}

fn default_summarizer() -> BackendConfig {
    BackendConfig::new("summary.py", "http://127.0.0.1:8000/summarize")
}

fn default_description() -> BackendConfig {
    BackendConfig::new("description.py", "http://127.0.0.1:8002/describe")
}

fn default_ideas() -> BackendConfig {
    BackendConfig::new("idea_generator.py", "http://127.0.0.1:6000/generate-ideas")
}

fn default_pdf() -> BackendConfig {
    BackendConfig::new("pdf.py", "http://127.0.0.1:7000/generate-pdf")
}

/// Environment variable overriding the listen port
pub const PORT_ENV: &str = "PORT";
/// Environment variable carrying the inference API token
pub const HF_API_TOKEN_ENV: &str = "HF_API_TOKEN";

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PORT` and `HF_API_TOKEN` from the process environment
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_env_with<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(PORT_ENV).filter(|p| !p.trim().is_empty()) {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {} value '{}': {}", PORT_ENV, port, e))?;
        }

        if let Some(token) = lookup(HF_API_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.server.hf_api_token = Some(token);
        }

        Ok(())
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        for (name, backend) in self.backends.named() {
            if let Err(e) = backend.validate(name) {
                errors.push(e);
            }
        }

        if self.supervisor.enabled && self.supervisor.interpreter.trim().is_empty() {
            errors.push("Supervisor: 'interpreter' must not be empty".to_string());
        }

        if self.server.max_body_bytes == 0 {
            errors.push("Server: 'max_body_bytes' must be greater than 0".to_string());
        }

        if self.server.max_backend_response_bytes == 0 {
            errors.push("Server: 'max_backend_response_bytes' must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
