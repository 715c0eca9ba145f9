//! Generators backed by external programs.
//!
//! The text command receives a JSON request on stdin and prints either a JSON
//! array of continuations or the continuation as plain text. The image command
//! receives the seed as its last argument and prints an encoded image.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::RgbImage;
use serde::Serialize;

use super::{GenerationParams, ImageGenerator, TextGenerator};
use crate::{mlog_debug, mlog_trace, Error, Result};

/// Request written to the text command's stdin.
#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    prompt: &'a str,
    max_length: usize,
    temperature: f64,
    top_k: u32,
    top_p: f64,
    n: usize,
}

/// Split a command line and resolve its program on `PATH`.
fn resolve(command_line: &str) -> Result<(PathBuf, Vec<String>)> {
    let mut parts = command_line.split_whitespace().map(String::from);
    let program = parts
        .next()
        .ok_or_else(|| Error::Config("generator command is empty".to_string()))?;
    let binary = which::which(&program).map_err(|_| Error::CommandNotFound(program.clone()))?;
    Ok((binary, parts.collect()))
}

/// Candidates from the text command's stdout.
pub fn parse_candidates(stdout: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(stdout.trim()) {
        Ok(candidates) => candidates,
        Err(_) if stdout.trim().is_empty() => Vec::new(),
        Err(_) => vec![stdout.to_string()],
    }
}

fn failure_message(program: &Path, output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        format!(
            "{} exited with code {}",
            program.display(),
            output.status.code().unwrap_or(-1)
        )
    } else {
        stderr.trim().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct CommandTextGenerator {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandTextGenerator {
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let (program, args) = resolve(command_line)?;
        Ok(Self { program, args })
    }

    /// Use a specific binary without a `PATH` lookup.
    pub fn with_program(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl TextGenerator for CommandTextGenerator {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Vec<String>> {
        let request = serde_json::to_vec(&TextRequest {
            prompt,
            max_length: params.max_length,
            temperature: params.temperature,
            top_k: params.top_k,
            top_p: params.top_p,
            n: params.candidates,
        })?;

        mlog_debug!("text command: {} ({} byte prompt)", self.program.display(), prompt.len());
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&request)?;
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(Error::TextGenerator(failure_message(&self.program, &output)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        mlog_trace!("text command output: {:?}", stdout);
        Ok(parse_candidates(&stdout))
    }
}

#[derive(Debug, Clone)]
pub struct CommandImageGenerator {
    participant: String,
    program: PathBuf,
    args: Vec<String>,
}

impl CommandImageGenerator {
    /// `{participant}` in any argument is replaced by the participant name.
    pub fn from_command_line(command_line: &str, participant: &str) -> Result<Self> {
        let (program, args) = resolve(command_line)?;
        Ok(Self::with_program(program, args, participant))
    }

    pub fn with_program(program: PathBuf, args: Vec<String>, participant: &str) -> Self {
        Self {
            participant: participant.to_string(),
            program,
            args: args
                .into_iter()
                .map(|a| a.replace("{participant}", participant))
                .collect(),
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::ImageGenerator {
            participant: self.participant.clone(),
            message: message.into(),
        }
    }
}

impl ImageGenerator for CommandImageGenerator {
    fn generate(&self, seed: u64) -> Result<RgbImage> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(seed.to_string())
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            return Err(self.error(failure_message(&self.program, &output)));
        }
        if output.stdout.is_empty() {
            return Err(self.error("command printed no image"));
        }

        let image = image::load_from_memory(&output.stdout)
            .map_err(|e| self.error(format!("undecodable image for seed {}: {}", seed, e)))?;
        Ok(image.to_rgb8())
    }
}
