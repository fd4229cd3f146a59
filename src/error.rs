//! Error kinds surfaced to callers and mapped to process exit codes.
//!
//! Recoverable failures travel as `Result`; programmer errors (double
//! release, unowned locks, schema mistakes) panic with a diagnostic and
//! are never encoded here. Messages are single lines naming the
//! operation, the affected object and a short reason; passwords never
//! appear.

use std::path::PathBuf;

use snafu::Snafu;

use barrow_compress::CompressError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("cannot parse storage specifier '{uri}': {reason}"))]
    InvalidSpecifier { uri: String, reason: String },

    #[snafu(display("cannot create '{}': file exists", path.display()))]
    FileExists { path: PathBuf },

    #[snafu(display("cannot open '{}': file not found", path.display()))]
    FileNotFound { path: PathBuf },

    #[snafu(display("'{}' is not a directory", path.display()))]
    NotADirectory { path: PathBuf },

    #[snafu(display("i/o error on '{}': {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("network error talking to '{host}': {reason}"))]
    Network { host: String, reason: String },

    #[snafu(display("no password available for '{user}@{host}'"))]
    MissingPassword { host: String, user: String },

    #[snafu(display("authentication failed for '{user}@{host}'"))]
    AuthenticationFailed { host: String, user: String },

    #[snafu(display("too many connections to '{host}'"))]
    TooManyConnections { host: String },

    #[snafu(display("{operation} is not supported by the {backend} storage"))]
    NotSupported {
        operation: &'static str,
        backend: &'static str,
    },

    #[snafu(display("malformed reply from master: {reason}"))]
    Protocol { reason: String },

    #[snafu(display("master request {id} timed out"))]
    RpcTimeout { id: u64 },

    #[snafu(display("master rejected request: {text} (code {code})"))]
    RpcFailed { code: u32, text: String },

    #[snafu(display("{stage} command '{command}' failed with {status}"))]
    ExternalCommand {
        stage: &'static str,
        command: String,
        status: String,
    },

    #[snafu(display("compression failed: {source}"))]
    Compress { source: CompressError },

    #[snafu(display("continuous store failure: {source}"))]
    Database { source: rusqlite::Error },

    #[snafu(display("filesystem watch failure on '{}': {source}", path.display()))]
    Watch {
        path: PathBuf,
        source: notify::Error,
    },

    #[snafu(display("cannot compile pattern: {source}"))]
    Pattern {
        source: barrow_common::pattern_list::PatternError,
    },
}

impl Error {
    /// Process exit code category for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidSpecifier { .. } | Error::Pattern { .. } => exitcode::USAGE,
            Error::MissingPassword { .. } | Error::AuthenticationFailed { .. } => exitcode::NOPERM,
            Error::FileExists { .. }
            | Error::FileNotFound { .. }
            | Error::NotADirectory { .. }
            | Error::Io { .. }
            | Error::Network { .. }
            | Error::TooManyConnections { .. }
            | Error::RpcTimeout { .. }
            | Error::Compress { .. }
            | Error::Database { .. }
            | Error::Watch { .. } => exitcode::IOERR,
            _ => exitcode::SOFTWARE,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
