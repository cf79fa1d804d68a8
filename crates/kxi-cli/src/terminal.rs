//! Terminal implementation of the interaction seam

use console::{Term, style};
use indicatif::{ProgressBar, ProgressStyle};

use kxi_kube::{Interaction, KubeError, render_table};

/// Prompts on the controlling terminal, output on stdout
pub struct TermInteraction {
    term: Term,
}

impl Default for TermInteraction {
    fn default() -> Self {
        Self::new()
    }
}

fn input_error(e: std::io::Error) -> KubeError {
    KubeError::Interaction(e.to_string())
}

impl TermInteraction {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
        }
    }

    fn ask(&self, text: &str) -> kxi_kube::Result<String> {
        self.term.write_str(text).map_err(input_error)?;
        self.term.flush().map_err(input_error)?;
        // Not attended: an empty line, so defaults apply
        self.term.read_line().map_err(input_error)
    }
}

/// Interpret a yes/no answer, `None` for anything unrecognised
pub fn parse_answer(answer: &str, default: bool) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

impl Interaction for TermInteraction {
    fn confirm(&self, prompt: &str, default: bool) -> kxi_kube::Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let answer = self.ask(&format!("{} {}: ", prompt, hint))?;
            match parse_answer(&answer, default) {
                Some(choice) => return Ok(choice),
                None => println!("{} Please answer y or n", style("✗").red().bold()),
            }
        }
    }

    fn prompt(&self, text: &str, default: Option<&str>) -> kxi_kube::Result<String> {
        let shown = match default {
            Some(d) => format!("{} [{}]: ", text, d),
            None => format!("{}: ", text),
        };
        let answer = self.ask(&shown)?;
        let answer = answer.trim();
        if answer.is_empty() {
            Ok(default.unwrap_or_default().to_string())
        } else {
            Ok(answer.to_string())
        }
    }

    fn prompt_secret(&self, text: &str) -> kxi_kube::Result<String> {
        rpassword::prompt_password(format!("{}: ", text)).map_err(input_error)
    }

    fn header(&self, text: &str) {
        println!("\n{}", style(format!("╭ {}", text.trim())).bold());
    }

    fn info(&self, text: &str) {
        println!("{} {}", style("→").blue().bold(), text);
    }

    fn warn(&self, text: &str) {
        println!("{} {}", style("⚠").yellow(), style(text).yellow());
    }

    fn error(&self, text: &str) {
        eprintln!("{} {}", style("✗").red().bold(), style(text).red());
    }

    fn table(&self, headers: &[&str], rows: &[Vec<String>]) {
        println!("{}", render_table(headers, rows));
    }

    fn progress(&self, len: u64, message: &str) -> ProgressBar {
        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.blue} {msg} [{bar:20.cyan/blue}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(message.to_string());
        bar
    }
}
