//! Command submission for the client
//!
//! This module handles:
//! - Building command groups, optionally in encoded form
//! - Tracking submitted tasks until a terminal response or deadline

mod tracker;

pub use tracker::{TaskTracker, TaskUpdate};

use webtask_shared::codec;
use webtask_shared::instruction::{parse_group, ENCODED_MARKER};

/// Wrap a command in the encoded form when requested
pub fn prepare_command(raw: &str, encoded: bool) -> String {
    if encoded && !raw.starts_with(ENCODED_MARKER) {
        format!("{}{}", ENCODED_MARKER, codec::encode(raw.as_bytes()))
    } else {
        raw.to_string()
    }
}

/// Positions of commands the device will skip without running
pub fn skipped_commands(commands: &[String]) -> Vec<usize> {
    parse_group(commands)
        .iter()
        .enumerate()
        .filter(|(_, parsed)| parsed.is_skip())
        .map(|(index, _)| index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use webtask_shared::instruction::parse_command;
    use webtask_shared::ParsedCommand;

    #[test]
    fn test_prepare_plain_passthrough() {
        assert_eq!(prepare_command("kwkF", false), "kwkF");
    }

    #[test]
    fn test_prepare_encoded_parses_back() {
        let prepared = prepare_command("kwkF", true);
        assert!(prepared.starts_with("b64:"));

        match parse_command(&prepared) {
            ParsedCommand::Execute(instruction) => {
                assert_eq!(instruction.token, b'k');
                assert_eq!(instruction.args(), b"wkF");
            }
            other => panic!("expected Execute, got {other:?}"),
        }
    }

    #[test]
    fn test_prepare_keeps_already_encoded() {
        assert_eq!(prepare_command("b64:SQDi", true), "b64:SQDi");
    }

    #[test]
    fn test_skipped_commands_reported_by_position() {
        let commands: Vec<String> = ["kwkF", "b64:!!!", "", "F10", "b64:"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(skipped_commands(&commands), vec![1, 2, 4]);
        assert!(skipped_commands(&commands[3..4]).is_empty());
    }
}
