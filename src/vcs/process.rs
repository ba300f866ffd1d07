//! Session served by an external executable
//!
//! The command is spawned once per request. It reads one JSON request
//! line from stdin and answers with one JSON response line on stdout.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use super::protocol::{SessionRequest, SessionResponse};
use super::session::{Session, SessionError};

#[derive(Debug, Clone)]
pub struct ProcessSession {
    program: PathBuf,
    args: Vec<String>,
    user_id: String,
}

impl ProcessSession {
    pub fn new(program: impl Into<PathBuf>, user_id: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            user_id: user_id.into(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn failed(&self, reason: impl ToString) -> SessionError {
        SessionError::Process {
            command: self.program.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Session for ProcessSession {
    fn execute(&self, request: &SessionRequest) -> Result<SessionResponse, SessionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.failed(e))?;

        let line =
            serde_json::to_string(request).map_err(|e| SessionError::Protocol(e.to_string()))?;
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| self.failed("stdin unavailable"))?;
            writeln!(stdin, "{}", line).map_err(|e| self.failed(e))?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.failed("stdout unavailable"))?;
        let response_line = BufReader::new(stdout).lines().next().transpose();

        let status = child.wait().map_err(|e| self.failed(e))?;
        let response_line = response_line.map_err(|e| self.failed(e))?;

        let Some(response_line) = response_line else {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(self.failed(format!(
                "no response ({}): {}",
                status,
                stderr.trim()
            )));
        };

        debug!(command = %self.program.display(), operation = %request.operation, %status, "session process answered");

        serde_json::from_str(&response_line).map_err(|e| SessionError::Protocol(e.to_string()))
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }
}
