pub mod read;

pub use read::{is_emergency_stop, parse_line, Command, Kind, ParamValue, ParseError};
