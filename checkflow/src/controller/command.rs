//! Text commands accepted by the controller.

use serde::{Deserialize, Serialize};

/// A parsed controller command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "input", rename_all = "snake_case")]
pub enum Command {
    /// Start or continue a run with this input.
    Submit(String),
    /// Continue a parked run with its recorded input.
    Resume,
    /// Clear the run.
    Reset,
    /// Report where the run stands.
    Status,
    /// Show the output of the furthest completed stage.
    ShowOutput,
}

impl Command {
    /// Parses user text. Anything that is not a known command word is a
    /// submit of that text.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "reset workflow" | "reset" => Self::Reset,
            "resume workflow" | "resume" => Self::Resume,
            "checkpoint status" | "status" => Self::Status,
            "show final code" | "show final output" => Self::ShowOutput,
            _ => Self::Submit(text.to_string()),
        }
    }

    /// A short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit(_) => "submit",
            Self::Resume => "resume",
            Self::Reset => "reset",
            Self::Status => "status",
            Self::ShowOutput => "show_output",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_words() {
        assert_eq!(Command::parse("reset workflow"), Command::Reset);
        assert_eq!(Command::parse("  Resume Workflow "), Command::Resume);
        assert_eq!(Command::parse("CHECKPOINT STATUS"), Command::Status);
        assert_eq!(Command::parse("show final code"), Command::ShowOutput);
        assert_eq!(Command::parse("show final output"), Command::ShowOutput);
    }

    #[test]
    fn test_other_text_is_submitted_verbatim() {
        assert_eq!(
            Command::parse("write a csv parser"),
            Command::Submit("write a csv parser".to_string())
        );
        assert_eq!(
            Command::parse("please reset workflow"),
            Command::Submit("please reset workflow".to_string())
        );
    }
}
