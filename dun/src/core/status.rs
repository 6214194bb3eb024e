//! Completion protocol echoed back by harnesses.
//!
//! Harness output is freeform text. The only load-bearing part is an
//! `EXIT_SIGNAL` line inside a block delimited by literal marker lines:
//!
//! ```text
//! ---DUN_STATUS---
//! STATUS: <free text>
//! EXIT_SIGNAL: true|false
//! ---END_DUN_STATUS---
//! ```
//!
//! Parsing never fails: a missing or malformed block means "not done".

pub const STATUS_BEGIN: &str = "---DUN_STATUS---";
pub const STATUS_END: &str = "---END_DUN_STATUS---";

const EXIT_SIGNAL_KEY: &str = "EXIT_SIGNAL";
const STATUS_KEY: &str = "STATUS";

/// Fields extracted from a complete status block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusBlock {
    /// Informational `STATUS:` text, if present.
    pub status: Option<String>,
    /// True only for the literal value `true`.
    pub exit_signal: bool,
}

/// Extract the last complete status block from `text`.
///
/// Harnesses sometimes echo the protocol template before their answer, so a
/// later block supersedes earlier ones. An unterminated block is ignored.
pub fn parse_status_block(text: &str) -> Option<StatusBlock> {
    let mut last = None;
    let mut current: Option<StatusBlock> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed == STATUS_BEGIN {
            current = Some(StatusBlock::default());
            continue;
        }
        if trimmed == STATUS_END {
            if let Some(block) = current.take() {
                last = Some(block);
            }
            continue;
        }
        let Some(block) = current.as_mut() else {
            continue;
        };
        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        match key.trim() {
            EXIT_SIGNAL_KEY => block.exit_signal = value.trim() == "true",
            STATUS_KEY => {
                let value = value.trim();
                block.status = (!value.is_empty()).then(|| value.to_string());
            }
            _ => {}
        }
    }

    last
}

/// True when the response carries a status block with `EXIT_SIGNAL: true`.
pub fn parse_exit_signal(text: &str) -> bool {
    parse_status_block(text).is_some_and(|block| block.exit_signal)
}

/// Protocol instructions appended to every prompt sent to a harness.
pub fn protocol_instructions() -> String {
    format!(
        "{STATUS_BEGIN}\n{STATUS_KEY}: <one line describing what you did>\n{EXIT_SIGNAL_KEY}: true|false\n{STATUS_END}"
    )
}
