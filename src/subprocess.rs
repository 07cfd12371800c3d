//! Invoking the external collaborators horde shells out to (`bd`, `git`, `tmux`,
//! setup hooks).
//!
//! Output is drained on reader threads while the child runs, so a tool that
//! prints more than a pipe buffer never stalls against its own deadline.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::error::HordeError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of one invocation. `exit_code` is -1 when the child was
/// killed by a signal.
#[derive(Debug)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn parse_json<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_str(&self.stdout).context("decoding tool JSON output")
    }
}

/// One external command: program, arguments, working directory, child-only
/// environment and an optional deadline.
#[derive(Debug, Clone)]
pub struct Tool {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
    deadline: Option<Duration>,
}

impl Tool {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            deadline: None,
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(ToString::to_string));
        self
    }

    /// Kill the child and fail with `Timeout` once `limit` has passed.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.deadline = Some(limit);
        self
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Export a variable to the child only; horde's own environment is untouched.
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    pub fn env_list(&self) -> &[(String, String)] {
        &self.envs
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        cmd.envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd
    }

    /// Run to completion and capture both streams. A non-zero exit is not an
    /// error here; see [`Tool::run_ok`].
    pub fn run(&self) -> anyhow::Result<RunOutput> {
        tracing::debug!(program = %self.program, args = ?self.args, cwd = ?self.cwd, "running tool");
        let mut child = self.command().spawn().map_err(|e| spawn_error(&self.program, e))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match self.deadline {
            Some(limit) => wait_until(&mut child, Instant::now() + limit),
            None => child.wait().map(Some),
        }
        .with_context(|| format!("waiting for {}", self.program))?;

        let Some(status) = status else {
            // Readers are left detached: a grandchild may still hold the pipes.
            tracing::warn!(program = %self.program, "tool killed after deadline");
            return Err(HordeError::Timeout {
                tool: self.program.clone(),
                timeout_secs: self.deadline.map_or(0, |d| d.as_secs()),
            }
            .into());
        };

        Ok(RunOutput {
            stdout: collect(stdout, &self.program)?,
            stderr: collect(stderr, &self.program)?,
            exit_code: exit_code(status),
        })
    }

    /// Like [`Tool::run`], but a non-zero exit becomes `ToolFailed` carrying stderr.
    pub fn run_ok(&self) -> anyhow::Result<RunOutput> {
        let output = self.run()?;
        if !output.success() {
            return Err(HordeError::ToolFailed {
                tool: self.program.clone(),
                code: output.exit_code,
                message: output.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(output)
    }
}

/// Remediation text for the collaborators horde shells out to.
pub fn install_hint(tool: &str) -> &'static str {
    match tool {
        "bd" => "the relics store CLI (bd) on PATH",
        "git" => "your platform package manager (e.g. apt install git)",
        "tmux" => "your platform package manager (e.g. apt install tmux)",
        _ => "your platform package manager",
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> anyhow::Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        HordeError::ToolNotFound {
            tool: program.to_string(),
            hint: install_hint(program).to_string(),
        }
        .into()
    } else {
        anyhow::Error::new(e).context(format!("starting {program}"))
    }
}

type Reader = Option<JoinHandle<std::io::Result<Vec<u8>>>>;

trait Pipe: Read + Send + 'static {}
impl Pipe for ChildStdout {}
impl Pipe for ChildStderr {}

fn drain(pipe: Option<impl Pipe>) -> Reader {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn collect(reader: Reader, program: &str) -> anyhow::Result<String> {
    let Some(handle) = reader else {
        return Ok(String::new());
    };
    let bytes = handle
        .join()
        .map_err(|_| anyhow::anyhow!("output reader for {program} panicked"))?
        .with_context(|| format!("reading output of {program}"))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// `Ok(None)` when the deadline passed; the child has then been killed and reaped.
fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "kill after deadline failed");
            }
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
