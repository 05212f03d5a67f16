use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while converting a wheel.
///
/// The variants fall into four groups: preconditions that abort before any
/// mutation ([`NotAWheel`](Error::NotAWheel),
/// [`AlreadyBytecode`](Error::AlreadyBytecode),
/// [`UnsupportedSuffix`](Error::UnsupportedSuffix)), a missing capability
/// ([`SnifferUnavailable`](Error::SnifferUnavailable)), manifest
/// inconsistencies ([`RecordEntryMissing`](Error::RecordEntryMissing),
/// [`MalformedRecord`](Error::MalformedRecord)), and plain I/O or archive
/// failures which are propagated without retry.
#[derive(Debug, Error)]
pub enum Error {
    #[error("expected a *.whl archive, got `{0}`")]
    NotAWheel(PathBuf),

    #[error("refusing to compile `{0}`: it is already a bytecode file")]
    AlreadyBytecode(PathBuf),

    #[error("cannot map `{path}` to a bytecode path: unsupported suffix `{suffix}`")]
    UnsupportedSuffix { path: PathBuf, suffix: String },

    #[error("`{0}` needs content-based classification but no content sniffer is configured")]
    SnifferUnavailable(PathBuf),

    #[error("RECORD lists `{record_path}` but `{compiled_path}` does not exist")]
    RecordEntryMissing {
        record_path: String,
        compiled_path: PathBuf,
    },

    #[error("malformed RECORD row: `{0}`")]
    MalformedRecord(String),

    #[error("`{0}` does not contain exactly one *.dist-info directory")]
    DistInfoLayout(PathBuf),

    #[error("staging directory `{0}` already exists and is not empty")]
    StagingNotEmpty(PathBuf),

    #[error("bytecode compiler failed on `{path}`: {detail}")]
    CompileFailed { path: PathBuf, detail: String },

    #[error("invalid exclude pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("malformed metadata.json: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] io::Error),
}
