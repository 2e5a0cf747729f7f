//! Marlin-flavored G-code line parsing.
//!
//! This module turns one line received from the touchscreen's serial link
//! into a [`Command`]: a command letter/number pair plus its parameters.
//! It also validates the optional trailing `*cc` checksum used by Marlin's
//! serial protocol, independently of whatever a caller does with the result.
//!
//! # UTF-8 requirement
//!
//! The parser accepts `&str`, which guarantees valid UTF-8 at the type
//! level. Callers must reject invalid UTF-8 before invoking the parser —
//! the design intentionally does not silently rewrite bad bytes.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// The command-letter family a line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    G,
    M,
    T,
}

impl Kind {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'G' => Some(Kind::G),
            'M' => Some(Kind::M),
            'T' => Some(Kind::T),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let c = match self {
            Kind::G => 'G',
            Kind::M => 'M',
            Kind::T => 'T',
        };
        write!(f, "{c}")
    }
}

// ---------------------------------------------------------------------------
// ParamValue
// ---------------------------------------------------------------------------

/// The value carried by a single letter-prefixed parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) => Some(*v as i64),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Text(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A parsed G-code command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: Kind,
    pub number: u32,
    pub line_number: Option<u32>,
    pub params: BTreeMap<char, ParamValue>,
    /// A residual non-key-value tail, e.g. a bare filename argument.
    pub tail: Option<String>,
}

impl Command {
    pub fn get_int(&self, letter: char) -> Option<i64> {
        self.params.get(&letter).and_then(ParamValue::as_int)
    }

    pub fn get_float(&self, letter: char) -> Option<f64> {
        self.params.get(&letter).and_then(ParamValue::as_float)
    }

    pub fn has(&self, letter: char) -> bool {
        self.params.contains_key(&letter)
    }

    pub fn is(&self, kind: Kind, number: u32) -> bool {
        self.kind == kind && self.number == number
    }
}

// ---------------------------------------------------------------------------
// ParseError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    ChecksumMissing,
    MalformedChecksum,
    ChecksumMismatch { expected: u8, actual: u8 },
    UnknownCommandLetter(char),
    MissingCommandNumber,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty line"),
            ParseError::ChecksumMissing => write!(f, "checksum required but missing"),
            ParseError::MalformedChecksum => write!(f, "checksum is not a valid number"),
            ParseError::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            ParseError::UnknownCommandLetter(c) => write!(f, "unknown command letter '{c}'"),
            ParseError::MissingCommandNumber => write!(f, "command letter with no number"),
        }
    }
}

impl Error for ParseError {}

// ---------------------------------------------------------------------------
// parse_line
// ---------------------------------------------------------------------------

/// Returns true if `raw` contains the `M112` emergency-stop token anywhere,
/// checked before any other validation so a corrupt checksum never delays it.
pub fn is_emergency_stop(raw: &str) -> bool {
    raw.to_ascii_uppercase().contains("M112")
}

/// Parses one line of the serial protocol.
///
/// When `require_checksum` is set, a line with no trailing `*cc` is
/// rejected; otherwise a missing checksum is accepted and one that is
/// present is still validated.
pub fn parse_line(raw: &str, require_checksum: bool) -> Result<Command, ParseError> {
    let trimmed = raw.trim().trim_matches('\0');
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let body = match trimmed.rfind('*') {
        Some(star) => {
            let (body, cs_text) = (&trimmed[..star], &trimmed[star + 1..]);
            let expected: u8 = cs_text
                .trim()
                .parse()
                .map_err(|_| ParseError::MalformedChecksum)?;
            let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);
            if actual != expected {
                return Err(ParseError::ChecksumMismatch { expected, actual });
            }
            body
        }
        None => {
            if require_checksum {
                return Err(ParseError::ChecksumMissing);
            }
            trimmed
        }
    };

    let mut rest = body.trim();

    let mut line_number = None;
    if let Some(after_n) = rest.strip_prefix('N') {
        let digits: String = after_n.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            line_number = digits.parse().ok();
            rest = rest[1 + digits.len()..].trim_start();
        }
    }

    let mut chars = rest.chars();
    let letter = chars.next().ok_or(ParseError::Empty)?;
    let kind = Kind::from_char(letter.to_ascii_uppercase())
        .ok_or(ParseError::UnknownCommandLetter(letter))?;
    let number_str: String = chars.clone().take_while(|c| c.is_ascii_digit()).collect();
    if number_str.is_empty() {
        return Err(ParseError::MissingCommandNumber);
    }
    let number: u32 = number_str.parse().map_err(|_| ParseError::MissingCommandNumber)?;
    let after_number = &rest[1 + number_str.len()..];

    let mut params = BTreeMap::new();
    let mut tail_words = Vec::new();
    for word in after_number.split_whitespace() {
        let mut wc = word.chars();
        let first = wc.next().unwrap_or(' ');
        let value_str: String = wc.collect();
        // A colon-tagged word (`action:cancel`, `echo:busy`, …) is a message
        // token, not a letter-prefixed parameter, even when it happens to
        // start with a letter — keep it whole in the tail.
        if first.is_ascii_alphabetic() && first.to_ascii_uppercase() != 'N' && !word.contains(':') {
            let key = first.to_ascii_uppercase();
            if value_str.is_empty() {
                params.insert(key, ParamValue::Text(String::new()));
            } else if let Ok(i) = value_str.parse::<i64>() {
                params.insert(key, ParamValue::Int(i));
            } else if let Ok(f) = value_str.parse::<f64>() {
                params.insert(key, ParamValue::Float(f));
            } else {
                params.insert(key, ParamValue::Text(value_str));
            }
        } else {
            tail_words.push(word);
        }
    }

    let tail = if tail_words.is_empty() {
        None
    } else {
        Some(tail_words.join(" "))
    };

    Ok(Command {
        kind,
        number,
        line_number,
        params,
        tail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_command_no_checksum() {
        let cmd = parse_line("M105", false).unwrap();
        assert!(cmd.is(Kind::M, 105));
        assert!(cmd.params.is_empty());
    }

    #[test]
    fn command_with_line_number_and_valid_checksum() {
        let body = "N3 M105";
        let cs = body.bytes().fold(0u8, |a, b| a ^ b);
        let cmd = parse_line(&format!("{body}*{cs}"), true).unwrap();
        assert_eq!(cmd.line_number, Some(3));
        assert!(cmd.is(Kind::M, 105));
    }

    #[test]
    fn invalid_checksum_rejected() {
        let err = parse_line("N3 M105*99", true).unwrap_err();
        assert!(matches!(err, ParseError::ChecksumMismatch { .. }));
    }

    #[test]
    fn missing_checksum_rejected_when_required() {
        let err = parse_line("M105", true).unwrap_err();
        assert_eq!(err, ParseError::ChecksumMissing);
    }

    #[test]
    fn missing_checksum_accepted_when_not_required() {
        assert!(parse_line("M105", false).is_ok());
    }

    #[test]
    fn float_and_int_params() {
        let cmd = parse_line("G1 X12.5 Y-3 F180", false).unwrap();
        assert_eq!(cmd.get_float('X'), Some(12.5));
        assert_eq!(cmd.get_int('Y'), Some(-3));
        assert_eq!(cmd.get_int('F'), Some(180));
    }

    #[test]
    fn residual_filename_tail() {
        let cmd = parse_line("M23 0:/gcodes/cube.gcode", false).unwrap();
        assert_eq!(cmd.tail.as_deref(), Some("0:/gcodes/cube.gcode"));
    }

    #[test]
    fn bare_flag_param_with_no_value() {
        let cmd = parse_line("M420 S1", false).unwrap();
        assert_eq!(cmd.get_int('S'), Some(1));
    }

    #[test]
    fn empty_line_is_error() {
        assert_eq!(parse_line("", false).unwrap_err(), ParseError::Empty);
        assert_eq!(parse_line("   ", false).unwrap_err(), ParseError::Empty);
    }

    #[test]
    fn unknown_command_letter() {
        let err = parse_line("X1", false).unwrap_err();
        assert_eq!(err, ParseError::UnknownCommandLetter('X'));
    }

    #[test]
    fn colon_tagged_word_stays_in_tail_despite_leading_letter() {
        let cmd = parse_line("M118 P0 A1 action:cancel", false).unwrap();
        assert_eq!(cmd.get_int('P'), Some(0));
        assert_eq!(cmd.get_int('A'), Some(1));
        assert_eq!(cmd.tail.as_deref(), Some("action:cancel"));
    }

    #[test]
    fn emergency_stop_detected_even_with_bad_checksum() {
        assert!(is_emergency_stop("M112*1"));
        assert!(is_emergency_stop("N5 M112*77"));
        assert!(!is_emergency_stop("M105"));
    }
}
