//! Code execution dispatch to the external runner service.
//!
//! One-shot request/response: the code buffer and language selection go
//! out as JSON, captured stdout/stderr come back. The service keys
//! runtimes by language name and a pinned version
//! (see [`Language`](crate::protocol::Language)).
//!
//! The result is displayed locally and relayed as an `Output` update so
//! the counterpart sees identical output without re-running. A request
//! failure is surfaced to the invoking user only — the other side never
//! attempted execution and has no error state to receive.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::{Language, RunOutput};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Execution service endpoint
    pub endpoint: String,
    /// Caller-side timeout for the whole request
    pub timeout: Duration,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://emkc.org/api/v2/piston/execute".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Request body the execution service expects.
#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<ExecFile<'a>>,
    stdin: &'a str,
}

#[derive(Debug, Serialize)]
struct ExecFile<'a> {
    content: &'a str,
}

/// Response body: only the run phase matters here.
#[derive(Debug, Deserialize)]
struct ExecResponse {
    run: RunPhase,
}

#[derive(Debug, Deserialize, Default)]
struct RunPhase {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    code: Option<i32>,
}

/// Submits code to the execution service.
pub struct ExecutionDispatcher {
    config: ExecConfig,
    http: reqwest::Client,
}

impl ExecutionDispatcher {
    /// Create a dispatcher with the given configuration.
    pub fn new(config: ExecConfig) -> Result<Self, ExecError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .build()
            .map_err(ExecError::Http)?;
        Ok(Self { config, http })
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Result<Self, ExecError> {
        Self::new(ExecConfig::default())
    }

    /// Run `source` under `language`'s pinned runtime.
    pub async fn execute(&self, language: Language, source: &str) -> Result<RunOutput, ExecError> {
        self.execute_with_input(language, source, "").await
    }

    /// Run with program input fed to stdin.
    pub async fn execute_with_input(
        &self,
        language: Language,
        source: &str,
        stdin: &str,
    ) -> Result<RunOutput, ExecError> {
        if source.trim().is_empty() {
            return Err(ExecError::EmptySource);
        }

        let body = ExecRequest {
            language: language.name(),
            version: language.version(),
            files: vec![ExecFile { content: source }],
            stdin,
        };

        log::debug!("Dispatching {} bytes of {language} to {}", source.len(), self.config.endpoint);

        let response = self
            .http
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExecError::Service { status: status.as_u16(), message });
        }

        let parsed: ExecResponse = response.json().await.map_err(map_transport_error)?;
        let failed = parsed.run.code.map(|c| c != 0).unwrap_or(false);

        Ok(RunOutput {
            stdout: parsed.run.stdout,
            stderr: parsed.run.stderr,
            failed,
        })
    }

    /// Configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

fn map_transport_error(e: reqwest::Error) -> ExecError {
    if e.is_timeout() {
        ExecError::Timeout
    } else {
        ExecError::Http(e)
    }
}

/// Execution dispatch errors.
#[derive(Debug)]
pub enum ExecError {
    /// Source code must be non-empty
    EmptySource,
    /// Caller-side timeout elapsed
    Timeout,
    /// Transport-level failure
    Http(reqwest::Error),
    /// The service answered with a non-success status
    Service { status: u16, message: String },
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySource => write!(f, "Source code is empty"),
            Self::Timeout => write!(f, "Execution request timed out"),
            Self::Http(e) => write!(f, "Execution request failed: {e}"),
            Self::Service { status, message } => {
                write!(f, "Execution service error {status}: {message}")
            }
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ExecConfig::default();
        assert!(config.endpoint.ends_with("/execute"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_empty_source_rejected() {
        let dispatcher = ExecutionDispatcher::with_defaults().unwrap();

        let result = dispatcher.execute(Language::Python, "").await;
        assert!(matches!(result, Err(ExecError::EmptySource)));

        // Whitespace-only counts as empty
        let result = dispatcher.execute(Language::Python, "  \n\t ").await;
        assert!(matches!(result, Err(ExecError::EmptySource)));
    }

    #[test]
    fn test_request_body_shape() {
        let body = ExecRequest {
            language: Language::Python.name(),
            version: Language::Python.version(),
            files: vec![ExecFile { content: "print(1+1)" }],
            stdin: "",
        };
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["language"], "python");
        assert_eq!(value["version"], "3.10.0");
        assert_eq!(value["files"][0]["content"], "print(1+1)");
    }

    #[test]
    fn test_response_parse_defaults() {
        let parsed: ExecResponse =
            serde_json::from_str(r#"{"run": {"stdout": "2\n"}}"#).unwrap();
        assert_eq!(parsed.run.stdout, "2\n");
        assert_eq!(parsed.run.stderr, "");
        assert!(parsed.run.code.is_none());
    }

    #[test]
    fn test_response_parse_failure_code() {
        let parsed: ExecResponse = serde_json::from_str(
            r#"{"run": {"stdout": "", "stderr": "NameError", "code": 1}}"#,
        )
        .unwrap();
        assert_eq!(parsed.run.code, Some(1));
        assert_eq!(parsed.run.stderr, "NameError");
    }
}
