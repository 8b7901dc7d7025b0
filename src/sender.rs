//! Paced command sending: batches and script files.
//!
//! Script format, one entry per line:
//!
//! ```text
//! # comment
//! CMD1
//! \D 0.5
//! CMD2
//! ```
//!
//! Blank lines and `#` comments are skipped. Lines starting with `\` are
//! directives; `\D <seconds>` changes the pause between subsequent commands.
//! Everything else is sent verbatim.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;

use crate::{connection::Connection, notify::Notifier};

pub const COMMENT_MARKER: char = '#';
pub const DIRECTIVE_MARKER: char = '\\';
pub const DELAY_DIRECTIVE: &str = "\\D";

#[derive(Clone, Debug, PartialEq)]
pub enum ScriptLine {
    Command(String),
    /// `\D <seconds>`
    SetInterval(Duration),
    /// Directive that could not be understood. Reported and skipped.
    Invalid { line: String, reason: String },
}

/// Classify one line. `None` for blank lines and comments.
pub fn parse_line(line: &str) -> Option<ScriptLine> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(COMMENT_MARKER) {
        return None;
    }

    if !line.starts_with(DIRECTIVE_MARKER) {
        return Some(ScriptLine::Command(line.to_string()));
    }

    let invalid = |reason: String| ScriptLine::Invalid {
        line: line.to_string(),
        reason,
    };

    let parts: Vec<_> = line.split_whitespace().collect();
    if !parts[0].eq_ignore_ascii_case(DELAY_DIRECTIVE) {
        return Some(invalid("unrecognized directive".into()));
    }
    if parts.len() != 2 {
        return Some(invalid(format!("expected `{DELAY_DIRECTIVE} <seconds>`")));
    }

    let parsed = parts[1]
        .parse::<f64>()
        .map_err(|e| e.to_string())
        .and_then(|secs| Duration::try_from_secs_f64(secs).map_err(|e| e.to_string()));

    Some(match parsed {
        Ok(interval) => ScriptLine::SetInterval(interval),
        Err(e) => invalid(format!("bad delay: {e}")),
    })
}

pub fn parse_script(text: &str) -> Vec<ScriptLine> {
    text.lines().filter_map(parse_line).collect()
}

/// Send one command of a paced stream and report progress.
///
/// Returns false when the stream has to stop.
async fn send_paced(
    conn: &Connection,
    events: &Notifier,
    command: &str,
    index: usize,
    total: usize,
    interval: Duration,
) -> bool {
    if !conn.is_open() {
        events.system("Port is not open. Send cancelled.");
        return false;
    }

    if let Err(e) = conn.send(command).await {
        events.system(format!("Error sending '{command}': {e}"));
        return false;
    }
    events.system(format!("[{index}/{total}] sent: {command}"));

    /* Closing the port cuts the pause short */
    tokio::select! {
        _ = sleep(interval) => {}
        _ = conn.closed() => {}
    }
    true
}

pub(crate) async fn batch_job(
    conn: Arc<Connection>,
    events: Notifier,
    commands: Vec<String>,
    interval: Duration,
) {
    let total = commands.len();

    for (idx, command) in commands.iter().enumerate() {
        if !send_paced(&conn, &events, command, idx + 1, total, interval).await {
            return;
        }
    }

    events.system("Batch send finished.");
}

pub(crate) async fn script_job(
    conn: Arc<Connection>,
    events: Notifier,
    script: Vec<ScriptLine>,
    mut interval: Duration,
) {
    let total = script
        .iter()
        .filter(|line| matches!(line, ScriptLine::Command(_)))
        .count();
    let mut sent = 0;

    for line in script {
        match line {
            ScriptLine::SetInterval(new_interval) => {
                interval = new_interval;
                events.system(format!(
                    "Interval changed to {} s.",
                    interval.as_secs_f64()
                ));
            }
            ScriptLine::Invalid { line, reason } => {
                events.system(format!("Warning: skipping '{line}': {reason}"));
            }
            ScriptLine::Command(command) => {
                sent += 1;
                if !send_paced(&conn, &events, &command, sent, total, interval).await {
                    return;
                }
            }
        }
    }

    events.system("Script send finished.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid(line: &ScriptLine) -> bool {
        matches!(line, ScriptLine::Invalid { .. })
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let script = parse_script("CMD1\n\\D 0.5\nCMD2\n# comment\n\n   \nCMD3\n");

        assert_eq!(
            script,
            [
                ScriptLine::Command("CMD1".into()),
                ScriptLine::SetInterval(Duration::from_millis(500)),
                ScriptLine::Command("CMD2".into()),
                ScriptLine::Command("CMD3".into()),
            ]
        );
    }

    #[test]
    fn commands_are_trimmed_but_otherwise_verbatim() {
        assert_eq!(
            parse_line("  AP 1.0VL \r"),
            Some(ScriptLine::Command("AP 1.0VL".into()))
        );
    }

    #[test]
    fn delay_directive_is_case_insensitive() {
        assert_eq!(
            parse_line("\\d 2"),
            Some(ScriptLine::SetInterval(Duration::from_secs(2)))
        );
        assert_eq!(
            parse_line("\\D 0"),
            Some(ScriptLine::SetInterval(Duration::ZERO))
        );
    }

    #[test]
    fn malformed_directives_are_invalid() {
        for line in ["\\D", "\\D 1 2", "\\D abc", "\\D -1", "\\D0.5", "\\X 1", "\\"] {
            let parsed = parse_line(line).unwrap();
            assert!(invalid(&parsed), "{line} parsed as {parsed:?}");
        }
    }
}
