//! User interaction seam
//!
//! The lifecycle manager and orchestrator never touch the terminal directly.
//! Prompts and output go through [`Interaction`]; the CLI provides a terminal
//! implementation and tests use [`ScriptedInteraction`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use indicatif::ProgressBar;

use crate::error::{KubeError, Result};

/// Prompts and user-facing output
pub trait Interaction: Send + Sync {
    /// Yes/no question
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;

    /// Free text answer, `default` is used for empty input
    fn prompt(&self, text: &str, default: Option<&str>) -> Result<String>;

    /// Hidden text answer
    fn prompt_secret(&self, text: &str) -> Result<String>;

    /// Section heading
    fn header(&self, text: &str);

    fn info(&self, text: &str);

    fn warn(&self, text: &str);

    fn error(&self, text: &str);

    /// Plain column-aligned table
    fn table(&self, headers: &[&str], rows: &[Vec<String>]);

    /// Progress bar for a wait loop of `len` steps
    fn progress(&self, len: u64, message: &str) -> ProgressBar;
}

/// Render rows as left-aligned columns separated by two spaces
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let columns = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(columns) {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let render_row = |cells: Vec<&str>| {
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i + 1 == cells.len() {
                line.push_str(cell);
            } else {
                line.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
            }
        }
        line.trim_end().to_string()
    };

    let mut lines = vec![render_row(headers.to_vec())];
    for row in rows {
        lines.push(render_row(
            (0..columns)
                .map(|i| row.get(i).map(String::as_str).unwrap_or_default())
                .collect(),
        ));
    }
    lines.join("\n")
}

/// One recorded interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Header(String),
    Info(String),
    Warn(String),
    Error(String),
    Table(String),
    Confirm { prompt: String, answer: bool },
    Prompt { text: String, answer: String },
}

#[derive(Default)]
struct Script {
    confirms: VecDeque<bool>,
    answers: VecDeque<String>,
    lines: Vec<Line>,
}

/// Interaction driven by queued answers, recording everything shown
///
/// Running out of queued answers is an error so tests notice unexpected
/// prompts.
#[derive(Clone, Default)]
pub struct ScriptedInteraction {
    script: Arc<Mutex<Script>>,
}

impl ScriptedInteraction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue answers for `confirm`, consumed in order
    pub fn with_confirms(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.lock().confirms.extend(answers);
        self
    }

    /// Queue answers for `prompt` and `prompt_secret`, consumed in order
    pub fn with_answers<S: Into<String>>(self, answers: impl IntoIterator<Item = S>) -> Self {
        self.lock().answers.extend(answers.into_iter().map(Into::into));
        self
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, line: Line) {
        self.lock().lines.push(line);
    }

    /// Everything shown or asked so far
    pub fn lines(&self) -> Vec<Line> {
        self.lock().lines.clone()
    }

    /// Text of every info, warning, error and header line
    pub fn output(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|line| match line {
                Line::Header(s) | Line::Info(s) | Line::Warn(s) | Line::Error(s) | Line::Table(s) => {
                    Some(s)
                }
                _ => None,
            })
            .collect()
    }

    /// True when any output line contains `needle`
    pub fn printed(&self, needle: &str) -> bool {
        self.output().iter().any(|l| l.contains(needle))
    }

    /// Prompts of every confirmation asked
    pub fn confirmations(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|line| match line {
                Line::Confirm { prompt, .. } => Some(prompt),
                _ => None,
            })
            .collect()
    }

    /// Warnings and errors only
    pub fn problems(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter_map(|line| match line {
                Line::Warn(s) | Line::Error(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

impl Interaction for ScriptedInteraction {
    fn confirm(&self, prompt: &str, _default: bool) -> Result<bool> {
        let mut script = self.lock();
        let answer = script.confirms.pop_front().ok_or_else(|| {
            KubeError::Interaction(format!("no scripted answer for '{}'", prompt.trim()))
        })?;
        script.lines.push(Line::Confirm {
            prompt: prompt.to_string(),
            answer,
        });
        Ok(answer)
    }

    fn prompt(&self, text: &str, default: Option<&str>) -> Result<String> {
        let mut script = self.lock();
        let answer = match script.answers.pop_front() {
            Some(a) if a.is_empty() => default.unwrap_or_default().to_string(),
            Some(a) => a,
            None => {
                return Err(KubeError::Interaction(format!(
                    "no scripted answer for '{}'",
                    text
                )));
            }
        };
        script.lines.push(Line::Prompt {
            text: text.to_string(),
            answer: answer.clone(),
        });
        Ok(answer)
    }

    fn prompt_secret(&self, text: &str) -> Result<String> {
        let mut script = self.lock();
        let answer = script.answers.pop_front().ok_or_else(|| {
            KubeError::Interaction(format!("no scripted answer for '{}'", text))
        })?;
        script.lines.push(Line::Prompt {
            text: text.to_string(),
            answer: "********".to_string(),
        });
        Ok(answer)
    }

    fn header(&self, text: &str) {
        self.record(Line::Header(text.to_string()));
    }

    fn info(&self, text: &str) {
        self.record(Line::Info(text.to_string()));
    }

    fn warn(&self, text: &str) {
        self.record(Line::Warn(text.to_string()));
    }

    fn error(&self, text: &str) {
        self.record(Line::Error(text.to_string()));
    }

    fn table(&self, headers: &[&str], rows: &[Vec<String>]) {
        self.record(Line::Table(render_table(headers, rows)));
    }

    fn progress(&self, _len: u64, _message: &str) -> ProgressBar {
        ProgressBar::hidden()
    }
}
