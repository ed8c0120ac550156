use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use vprompt_comfyui::workflow::NodeBindings;
use vprompt_core::generation::GenerationKind;
use vprompt_core::timing::RunnerTiming;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development against a
/// ComfyUI instance on the same machine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `5001`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Where the generation backend lives.
    pub comfyui: ComfyUIConfig,
    /// Templates, output storage and runner timing.
    pub generation: GenerationConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `5001`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5001`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = env_or("PORT", "5001");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5001".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_or("REQUEST_TIMEOUT_SECS", "30");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            comfyui: ComfyUIConfig::from_env(),
            generation: GenerationConfig::from_env(),
        }
    }
}

/// Location of the ComfyUI server.
#[derive(Debug, Clone)]
pub struct ComfyUIConfig {
    pub address: String,
    pub port: u16,
}

impl ComfyUIConfig {
    /// | Env Var                  | Default     |
    /// |--------------------------|-------------|
    /// | `COMFYUI_SERVER_ADDRESS` | `127.0.0.1` |
    /// | `COMFYUI_SERVER_PORT`    | `8188`      |
    pub fn from_env() -> Self {
        Self {
            address: std::env::var("COMFYUI_SERVER_ADDRESS")
                .unwrap_or_else(|_| "127.0.0.1".into()),
            port: env_or("COMFYUI_SERVER_PORT", "8188"),
        }
    }

    pub fn api_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Directory artifacts are written to.
    pub output_dir: PathBuf,
    /// URL path the output directory is served under.
    pub public_output_path: String,
    /// Replaces a leading `ComfyUI_` in local artifact names.
    pub output_file_prefix: String,
    /// Template used for image requests without their own workflow.
    pub workflow_path: PathBuf,
    /// Template used for audio requests without their own workflow.
    pub audio_workflow_path: PathBuf,
    pub bindings: NodeBindings,
    pub timing: RunnerTiming,
}

impl GenerationConfig {
    /// | Env Var                        | Default                |
    /// |--------------------------------|------------------------|
    /// | `OUTPUT_DIR`                   | `uploads/generated`    |
    /// | `PUBLIC_OUTPUT_PATH`           | `/outputs`             |
    /// | `OUTPUT_FILE_PREFIX`           | `vPrompt_`             |
    /// | `WORKFLOW_PATH`                | `workflows/image.json` |
    /// | `AUDIO_WORKFLOW_PATH`          | `workflows/audio.json` |
    /// | `POSITIVE_NODE_ID`             | `6`                    |
    /// | `NEGATIVE_NODE_ID`             | `7`                    |
    /// | `SEED_NODE_ID`                 | `3`                    |
    /// | `PUSH_WINDOW_SECS`             | `60`                   |
    /// | `POLL_WINDOW_SECS`             | `90`                   |
    /// | `POLL_INTERVAL_MS`             | `1000`                 |
    /// | `COMPLETION_GRACE_MS`          | `1000`                 |
    /// | `SETTLE_ATTEMPTS`              | `3`                    |
    /// | `COMFYUI_CONNECT_TIMEOUT_SECS` | `10`                   |
    /// | `COMFYUI_REQUEST_TIMEOUT_SECS` | `30`                   |
    pub fn from_env() -> Self {
        let public_output_path: String = env_or("PUBLIC_OUTPUT_PATH", "/outputs");
        assert!(
            public_output_path.starts_with('/') && public_output_path.len() > 1,
            "PUBLIC_OUTPUT_PATH must be an absolute, non-root URL path"
        );

        let bindings = NodeBindings {
            positive: env_or("POSITIVE_NODE_ID", "6"),
            negative: env_or("NEGATIVE_NODE_ID", "7"),
            seed: env_or("SEED_NODE_ID", "3"),
        };

        let timing = RunnerTiming {
            push_window: Duration::from_secs(env_or("PUSH_WINDOW_SECS", "60")),
            poll_window: Duration::from_secs(env_or("POLL_WINDOW_SECS", "90")),
            poll_interval: Duration::from_millis(env_or("POLL_INTERVAL_MS", "1000")),
            completion_grace: Duration::from_millis(env_or("COMPLETION_GRACE_MS", "1000")),
            settle_attempts: env_or("SETTLE_ATTEMPTS", "3"),
            connect_timeout: Duration::from_secs(env_or("COMFYUI_CONNECT_TIMEOUT_SECS", "10")),
            request_timeout: Duration::from_secs(env_or("COMFYUI_REQUEST_TIMEOUT_SECS", "30")),
        };
        assert!(
            !timing.poll_interval.is_zero(),
            "POLL_INTERVAL_MS must be greater than zero"
        );
        assert!(
            !timing.connect_timeout.is_zero() && !timing.request_timeout.is_zero(),
            "COMFYUI_CONNECT_TIMEOUT_SECS and COMFYUI_REQUEST_TIMEOUT_SECS must be greater than zero"
        );

        Self {
            output_dir: env_or("OUTPUT_DIR", "uploads/generated"),
            public_output_path: public_output_path.trim_end_matches('/').to_string(),
            output_file_prefix: env_or("OUTPUT_FILE_PREFIX", "vPrompt_"),
            workflow_path: env_or("WORKFLOW_PATH", "workflows/image.json"),
            audio_workflow_path: env_or("AUDIO_WORKFLOW_PATH", "workflows/audio.json"),
            bindings,
            timing,
        }
    }

    /// Template for requests of `kind` that ship no workflow.
    pub fn workflow_path(&self, kind: GenerationKind) -> &Path {
        match kind {
            GenerationKind::Image => &self.workflow_path,
            GenerationKind::Audio => &self.audio_workflow_path,
        }
    }
}

/// Read `key` from the environment, falling back to `default`.
///
/// Panics when the value does not parse; misconfiguration should fail at
/// startup.
fn env_or<T>(key: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .unwrap_or_else(|e| panic!("{key} has an invalid value '{raw}': {e}"))
}
