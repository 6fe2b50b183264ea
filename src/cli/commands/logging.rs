//! `-v` / `SALESGATE_LOG_LEVEL`: a repeat count on the command line, a level
//! name or its index in the environment.

use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbosity";

/// Index is the verbosity count; counts past the end stay at `TRACE`.
const LEVELS: [Level; 5] = [
    Level::ERROR,
    Level::WARN,
    Level::INFO,
    Level::DEBUG,
    Level::TRACE,
];

fn parse_verbosity(value: &str) -> Result<u8, String> {
    if let Ok(count) = value.parse::<u8>() {
        if usize::from(count) < LEVELS.len() {
            return Ok(count);
        }
        return Err(format!("log level index must be below {}", LEVELS.len()));
    }
    let level: Level = value
        .parse()
        .map_err(|_| format!("unknown log level: {value}"))?;
    LEVELS
        .iter()
        .position(|candidate| *candidate == level)
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| format!("unknown log level: {value}"))
}

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(parse_verbosity)
}

/// Tracing level for a verbosity count.
#[must_use]
pub fn level_for(verbosity: u8) -> Level {
    LEVELS[usize::from(verbosity).min(LEVELS.len() - 1)]
}

/// Tracing level selected by the parsed arguments; `ERROR` when unset.
#[must_use]
pub fn level(matches: &ArgMatches) -> Level {
    level_for(matches.get_one::<u8>(ARG_VERBOSITY).copied().unwrap_or(0))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Log level: repeat -v, or set error, warn, info, debug or trace (default: error)")
            .env("SALESGATE_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}
