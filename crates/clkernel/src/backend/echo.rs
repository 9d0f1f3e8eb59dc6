//
// echo.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

//! A small line-oriented language, used by the `clkernel` binary and the
//! tests. Each line is one command:
//!
//! - `print <text>` / `eprint <text>` write to stdout / stderr
//! - `display <text>`, `html <src>`, `markdown <src>`, `json <value>` and
//!   `svg <src>` display an object
//! - `sleep <ms>` waits, honoring interrupts
//! - `fail <message>` raises an error
//! - `<name> = <value>` assigns a variable
//!
//! Any other line is an expression; when it is the last line, its value
//! (a variable's value, or the text itself) is the result of the cell.
//! A trailing backslash continues a line.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use clshared::kernel_info::LanguageInfo;
use clshared::message_content::{Completeness, IsCompleteReply};
use regex::Regex;

use super::{ExecutionBackend, OutputSink};
use crate::error::EvaluationError;
use crate::renderer::DisplayObject;

/// How often `sleep` checks for an interrupt.
const SLEEP_STEP: Duration = Duration::from_millis(10);

/// The longest `sleep` accepted, in milliseconds (one day).
const MAX_SLEEP_MS: u64 = 24 * 60 * 60 * 1000;

pub struct EchoBackend {
    variables: Mutex<HashMap<String, String>>,
    interrupted: AtomicBool,
    identifier: Option<Regex>,
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoBackend {
    pub fn new() -> Self {
        Self {
            variables: Mutex::new(HashMap::new()),
            interrupted: AtomicBool::new(false),
            identifier: Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok(),
        }
    }

    fn is_identifier(&self, text: &str) -> bool {
        match &self.identifier {
            Some(re) => re.is_match(text),
            None => false,
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        let variables = self.variables.lock().unwrap_or_else(|e| e.into_inner());
        variables.get(name).cloned()
    }

    /// The value of an operand: a variable's value, or the text itself.
    fn resolve(&self, operand: &str) -> String {
        if self.is_identifier(operand) {
            if let Some(value) = self.lookup(operand) {
                return value;
            }
        }
        operand.to_string()
    }

    async fn sleep(&self, millis: &str) -> Result<(), EvaluationError> {
        let millis: u64 = millis.trim().parse().map_err(|_| {
            EvaluationError::new("ValueError", &format!("invalid duration '{}'", millis))
        })?;
        let too_long =
            || EvaluationError::new("ValueError", &format!("duration {}ms is too long", millis));
        if millis > MAX_SLEEP_MS {
            return Err(too_long());
        }
        let deadline = tokio::time::Instant::now()
            .checked_add(Duration::from_millis(millis))
            .ok_or_else(too_long)?;
        while tokio::time::Instant::now() < deadline {
            if self.interrupted.load(Ordering::SeqCst) {
                return Err(EvaluationError::new(
                    "KeyboardInterrupt",
                    "execution interrupted",
                ));
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            tokio::time::sleep(std::cmp::min(SLEEP_STEP, remaining)).await;
        }
        Ok(())
    }

    async fn run_line(
        &self,
        line: &str,
        is_last: bool,
        output: &OutputSink,
    ) -> Result<(), EvaluationError> {
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "print" => output.stdout(&format!("{}\n", self.resolve(rest))),
            "eprint" => output.stderr(&format!("{}\n", self.resolve(rest))),
            "display" => output.display(DisplayObject::Text(self.resolve(rest))),
            "html" => output.display(DisplayObject::Html(rest.to_string())),
            "markdown" => output.display(DisplayObject::Markdown(rest.to_string())),
            "svg" => output.display(DisplayObject::Svg(rest.to_string())),
            "json" => {
                let value = serde_json::from_str(rest)
                    .map_err(|e| EvaluationError::new("JsonError", &e.to_string()))?;
                output.display(DisplayObject::Json(value));
            }
            "sleep" => self.sleep(rest).await?,
            "fail" => return Err(EvaluationError::new("EchoError", rest)),
            _ => {
                if let Some((name, value)) = line.split_once('=') {
                    let name = name.trim();
                    if self.is_identifier(name) {
                        let value = self.resolve(value.trim());
                        let mut variables =
                            self.variables.lock().unwrap_or_else(|e| e.into_inner());
                        variables.insert(name.to_string(), value);
                        return Ok(());
                    }
                }
                if is_last {
                    output.result(DisplayObject::Text(self.resolve(line)));
                }
            }
        }
        Ok(())
    }
}

/// Join lines ending in a backslash with the line that follows.
fn logical_lines(code: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for line in code.lines() {
        match line.strip_suffix('\\') {
            Some(head) => {
                current.push_str(head);
                current.push(' ');
            }
            None => {
                current.push_str(line);
                lines.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

#[async_trait]
impl ExecutionBackend for EchoBackend {
    fn language_info(&self) -> LanguageInfo {
        LanguageInfo {
            name: String::from("echo"),
            version: String::from(env!("CARGO_PKG_VERSION")),
            mimetype: String::from("text/plain"),
            file_extension: String::from(".txt"),
            pygments_lexer: None,
            codemirror_mode: None,
            nbconvert_exporter: None,
        }
    }

    async fn execute(&self, code: &str, output: &OutputSink) -> Result<(), EvaluationError> {
        // An interrupt only applies to the execution it arrives during
        self.interrupted.store(false, Ordering::SeqCst);

        let lines = logical_lines(code);
        let count = lines.len();
        for (index, line) in lines.iter().enumerate() {
            self.run_line(line, index + 1 == count, output).await?;
        }
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<DisplayObject, EvaluationError> {
        let expression = expression.trim();
        if let Some(value) = self.lookup(expression) {
            return Ok(DisplayObject::Text(value));
        }
        if self.is_identifier(expression) {
            return Err(EvaluationError::new(
                "NameError",
                &format!("name '{}' is not defined", expression),
            ));
        }
        match serde_json::from_str(expression) {
            Ok(value) => Ok(DisplayObject::Json(value)),
            Err(_) => Ok(DisplayObject::Text(expression.to_string())),
        }
    }

    fn is_complete(&self, code: &str) -> IsCompleteReply {
        if code.trim_end().ends_with('\\') {
            return IsCompleteReply {
                status: Completeness::Incomplete,
                indent: Some(String::new()),
            };
        }

        let mut depth: i64 = 0;
        for ch in code.chars() {
            match ch {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return IsCompleteReply {
                            status: Completeness::Invalid,
                            indent: None,
                        };
                    }
                }
                _ => {}
            }
        }

        if depth > 0 {
            IsCompleteReply {
                status: Completeness::Incomplete,
                indent: Some("    ".repeat(depth as usize)),
            }
        } else {
            IsCompleteReply {
                status: Completeness::Complete,
                indent: None,
            }
        }
    }

    fn interrupt(&self) {
        log::debug!("Interrupt requested");
        self.interrupted.store(true, Ordering::SeqCst);
    }

    async fn restart(&self) -> anyhow::Result<()> {
        let mut variables = self.variables.lock().unwrap_or_else(|e| e.into_inner());
        log::debug!("Restarting; discarding {} variable(s)", variables.len());
        variables.clear();
        Ok(())
    }
}
