use std::{sync::LazyLock, time::Duration};

use regex::Regex;
use tokio::time::Instant;

use crate::{
    error::Result,
    notify::Notifier,
    transport::{LineReader, decode_line},
};

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?").unwrap()
});

/// How a number was recovered from an instrument line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Parsed {
    /// The whole line was the number
    Direct(f64),
    /// The number was pulled out of surrounding text
    Extracted(f64),
}
impl Parsed {
    pub fn value(self) -> f64 {
        match self {
            Self::Direct(v) | Self::Extracted(v) => v,
        }
    }
}

/// Parse a trimmed instrument line, accepting `,` as decimal separator.
///
/// A full-line parse wins; otherwise the first signed decimal (with optional
/// exponent) found in the line is used.
pub fn parse_response(text: &str) -> Option<Parsed> {
    let normalized = text.replace(',', ".");

    if let Ok(value) = normalized.parse::<f64>() {
        return Some(Parsed::Direct(value));
    }

    NUMBER
        .find(&normalized)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(Parsed::Extracted)
}

/// Read lines until one carries a number or `max_wait` runs out.
///
/// Returns `Ok(None)` on timeout after reporting the last line seen. Only
/// transport failures are errors.
pub async fn try_read_once(
    reader: &mut dyn LineReader,
    max_wait: Duration,
    events: &Notifier,
) -> Result<Option<f64>> {
    let deadline = Instant::now() + max_wait;
    let mut last = String::new();

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }

        let Some(raw) = reader.read_line(deadline - now).await? else {
            continue;
        };
        let text = decode_line(&raw);
        last.clone_from(&text);
        if text.is_empty() {
            continue;
        }

        match parse_response(&text) {
            Some(Parsed::Direct(value)) => return Ok(Some(value)),
            Some(Parsed::Extracted(value)) => {
                events.system(format!("Parsed response: '{text}' -> {value}"));
                return Ok(Some(value));
            }
            None => {}
        }
    }

    events.system(format!(
        "Timed out waiting for a number. Last response: '{last}'"
    ));
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_line_numbers() {
        assert_eq!(parse_response("12.5"), Some(Parsed::Direct(12.5)));
        assert_eq!(parse_response("-3"), Some(Parsed::Direct(-3.0)));
        assert_eq!(parse_response("1.5e-3"), Some(Parsed::Direct(0.0015)));
    }

    #[test]
    fn comma_decimal_separator() {
        assert_eq!(parse_response("0,75"), Some(Parsed::Direct(0.75)));
        assert_eq!(parse_response("THD 2,5 %"), Some(Parsed::Extracted(2.5)));
    }

    #[test]
    fn first_number_in_text_wins() {
        assert_eq!(
            parse_response("RL=0.042 AVG=7"),
            Some(Parsed::Extracted(0.042))
        );
        assert_eq!(parse_response("val:.5E+1dB"), Some(Parsed::Extracted(5.0)));
        assert_eq!(parse_response("+7 then -8"), Some(Parsed::Extracted(7.0)));
    }

    #[test]
    fn text_without_numbers() {
        assert_eq!(parse_response("OVERLOAD"), None);
        assert_eq!(parse_response("."), None);
        assert_eq!(parse_response(""), None);
    }

    #[test]
    fn parsed_value() {
        assert_eq!(Parsed::Extracted(4.0).value(), 4.0);
        assert_eq!(Parsed::Direct(-1.0).value(), -1.0);
    }
}
