// src/processing/tools/command.rs

//! External tool invocation.
//!
//! Every stage of the pipeline is one [`ToolCommand`] run to completion. The
//! child is killed when the shared cancellation token fires, and is spawned in
//! its own process group (unix) or without a console window (Windows) so the
//! tools never attach to the user's terminal or desktop.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::utils::{ToolError, ToolResult};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Captured result of a successful invocation.
#[derive(Debug, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    /// Stdout followed by stderr, lossily decoded.
    pub fn combined(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&self.stderr));
        text
    }
}

/// One external program invocation: executable, arguments, working
/// directory, environment and optional stdin payload / stdout redirection.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    name: String,
    executable: PathBuf,
    args: Vec<OsString>,
    dir: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    stdin: Option<Vec<u8>>,
    stdout_file: Option<PathBuf>,
    strict_stderr: bool,
}

impl ToolCommand {
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args: Vec::new(),
            dir: None,
            env: Vec::new(),
            stdin: None,
            stdout_file: None,
            strict_stderr: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Bytes written to the child's stdin, which is then closed.
    pub fn stdin_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    /// Redirect stdout into a freshly created file instead of capturing it.
    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_file = Some(path.into());
        self
    }

    /// Treat any stderr output as failure, even with a zero exit status.
    pub fn strict_stderr(mut self) -> Self {
        self.strict_stderr = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Runs the program to completion.
    ///
    /// Returns [`ToolError::Cancelled`] as soon as `cancel` fires; dropping the
    /// pending child kills it.
    pub async fn run(&self, cancel: &CancellationToken) -> ToolResult<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled(self.name.clone()));
        }
        if self.executable.is_absolute() && !self.executable.exists() {
            return Err(ToolError::Missing {
                tool: self.name.clone(),
                path: self.executable.clone(),
            });
        }

        info!("run {}: {}", self.name, self);

        let mut cmd = self.build()?;
        let mut child = cmd.spawn().map_err(|e| ToolError::Spawn {
            tool: self.name.clone(),
            message: e.to_string(),
        })?;

        let stdin = child.stdin.take();
        let payload = self.stdin.as_deref();
        let feed = async move {
            if let (Some(mut pipe), Some(bytes)) = (stdin, payload) {
                pipe.write_all(bytes).await?;
                pipe.shutdown().await?;
            }
            Ok::<(), io::Error>(())
        };

        let (fed, output) = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("{} cancelled, killing child", self.name);
                return Err(ToolError::Cancelled(self.name.clone()));
            }
            done = async { tokio::join!(feed, child.wait_with_output()) } => done,
        };

        let output = output.map_err(|e| self.io_error(e))?;
        // A child that exits without reading stdin closes the pipe first.
        if let Err(e) = fed {
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(self.io_error(e));
            }
        }

        let captured = ToolOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        };

        if !output.status.success() {
            return Err(ToolError::Status {
                tool: self.name.clone(),
                status: output.status.to_string(),
                output: captured.combined(),
            });
        }
        if self.strict_stderr && !captured.stderr.is_empty() {
            return Err(ToolError::Diagnostics {
                tool: self.name.clone(),
                output: String::from_utf8_lossy(&captured.stderr).into_owned(),
            });
        }

        if let Some(path) = &self.stdout_file {
            tokio::fs::File::open(path)
                .await
                .map_err(|e| self.io_error(e))?
                .sync_all()
                .await
                .map_err(|e| self.io_error(e))?;
        }

        debug!("{} finished ({} bytes of output)", self.name, captured.stdout.len() + captured.stderr.len());
        Ok(captured)
    }

    fn build(&self) -> ToolResult<Command> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(if self.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }

        match &self.stdout_file {
            Some(path) => {
                let file = std::fs::File::create(path).map_err(|e| self.io_error(e))?;
                cmd.stdout(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::piped());
            }
        }

        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        Ok(cmd)
    }

    fn io_error(&self, err: io::Error) -> ToolError {
        ToolError::IO {
            tool: self.name.clone(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.executable.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        if let Some(path) = &self.stdout_file {
            write!(f, " > {}", path.display())?;
        }
        Ok(())
    }
}
