//! Command-line interface for pairgate.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;

/// Command-line arguments.
///
/// Options left unset do not override the config file or environment.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Host address to bind to.
    pub host: Option<IpAddr>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// API key for authentication (overrides config file).
    pub api_key: Option<String>,
    /// Disable authentication.
    pub no_auth: bool,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// SQLite database URL.
    pub database: Option<String>,
    /// Keep sessions in memory only.
    pub memory_store: bool,
    /// Maximum number of concurrent sessions.
    pub max_sessions: Option<usize>,
    /// Skip reconnecting sessions on startup.
    pub no_resume: bool,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                let value: String = parser.value()?.parse()?;
                result.host = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("host", value))?,
                );
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("port", value))?,
                );
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('k') | Long("api-key") => {
                result.api_key = Some(parser.value()?.parse()?);
            }
            Long("no-auth") => {
                result.no_auth = true;
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Short('d') | Long("database") => {
                result.database = Some(parser.value()?.parse()?);
            }
            Long("memory-store") => {
                result.memory_store = true;
            }
            Short('m') | Long("max-sessions") => {
                let value: String = parser.value()?.parse()?;
                let max: usize = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("max-sessions", value.clone()))?;
                if max == 0 {
                    return Err(ArgsError::InvalidValue("max-sessions", value));
                }
                result.max_sessions = Some(max);
            }
            Long("no-resume") => {
                result.no_resume = true;
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"pairgate {version}
Multi-session gateway for paired chat connections

USAGE:
    pairgate [OPTIONS]

OPTIONS:
    -H, --host <ADDR>          Host address to bind [default: 127.0.0.1]
    -p, --port <PORT>          Port to listen on [default: 8080]
    -c, --config <FILE>        Path to configuration file (JSON)
    -k, --api-key <KEY>        API key for authentication
    -l, --log-level <LVL>      Log level (error, warn, info, debug, trace)
    -d, --database <URL>       SQLite database URL [default: sqlite://pairgate.db]
        --memory-store         Keep sessions in memory only
    -m, --max-sessions <N>     Maximum concurrent sessions [default: 50]
        --no-resume            Do not reconnect sessions on startup
        --no-auth              Disable authentication
    -h, --help                 Print help
    -V, --version              Print version

ENVIRONMENT VARIABLES:
    PAIRGATE_HOST              Host address (overrides config)
    PAIRGATE_PORT              Port number (overrides config)
    PAIRGATE_API_KEY           API key (overrides config)
    PAIRGATE_DATABASE_URL      SQLite database URL (overrides config)
    PAIRGATE_MAX_SESSIONS      Maximum concurrent sessions (overrides config)
    PAIRGATE_LOG_LEVEL         Log level (overrides config)
    RUST_LOG                   Alternative log level setting

EXAMPLES:
    # Start with defaults (localhost:8080, no auth, ./pairgate.db)
    pairgate

    # Start on all interfaces with API key
    pairgate -H 0.0.0.0 -p 9000 -k my-secret-key

    # Start with config file
    pairgate -c /etc/pairgate/config.json

    # Throwaway instance
    pairgate --memory-store --no-resume
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("pairgate {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
