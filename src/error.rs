//! Rich diagnostic error types for the quadfuse pipeline.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the quadfuse pipeline.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum FuseError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Tuple(#[from] TupleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sort(#[from] SortError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Canon(#[from] CanonError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Tuple codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TupleError {
    #[error("malformed tuple at line {line}: {reason}")]
    #[diagnostic(
        code(fuse::tuple::malformed),
        help(
            "Tuple lines hold one or more terms and end with ` .`. \
             If this is an intermediate file, it is corrupt — rerun the load; \
             if it is an input file, fix the offending line."
        )
    )]
    Malformed { line: u64, reason: String },

    #[error("I/O error on {path}: {source}")]
    #[diagnostic(
        code(fuse::tuple::io),
        help("Check that the file exists, is readable, and the disk is not full.")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// External sort errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SortError {
    #[error("sort spill failed in {dir}: {source}")]
    #[diagnostic(
        code(fuse::sort::spill),
        help(
            "Writing a sorted run to disk failed. Check free space and permissions \
             on the working directory, or raise the in-memory sort ceiling."
        )
    )]
    Spill {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sort merge failed: {source}")]
    #[diagnostic(
        code(fuse::sort::merge),
        help(
            "Reading a spilled run back failed. The working directory may have \
             been tampered with mid-run."
        )
    )]
    Merge {
        #[source]
        source: std::io::Error,
    },

    #[error("sort input error: {source}")]
    #[diagnostic(
        code(fuse::sort::input),
        help("Check that the input file exists and is readable.")
    )]
    Input {
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Canonical mapping errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CanonError {
    #[error("malformed identifier in equivalence link: {term}")]
    #[diagnostic(
        code(fuse::canon::malformed_identifier),
        help(
            "Equivalence links must relate two resources (IRIs). Literal endpoints \
             are skipped with a warning during normal runs."
        )
    )]
    MalformedIdentifier { term: String },

    #[error("failed to persist canonical identifiers to {path}: {source}")]
    #[diagnostic(
        code(fuse::canon::persist),
        help(
            "The identifier list is written to a temporary file and renamed into \
             place. Check permissions on the target directory."
        )
    )]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read canonical identifiers from {path}: {source}")]
    #[diagnostic(
        code(fuse::canon::read),
        help("A missing file is treated as empty; any other read failure is reported here.")
    )]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Source errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SourceError {
    #[error("source \"{name}\" failed to load after {attempts} attempt(s): {message}")]
    #[diagnostic(
        code(fuse::source::load),
        help(
            "The source was retried with a fixed backoff before this error was \
             raised. Check that the file or endpoint is reachable."
        )
    )]
    LoadFailed {
        name: String,
        attempts: u32,
        message: String,
    },

    #[error("source \"{name}\": {source}")]
    #[diagnostic(
        code(fuse::source::parse),
        help("A quad line in this source could not be parsed.")
    )]
    Parse {
        name: String,
        #[source]
        source: TupleError,
    },
}

// ---------------------------------------------------------------------------
// Loader errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LoaderError {
    #[error("input load aborted: {source}")]
    #[diagnostic(
        code(fuse::loader::aborted),
        help(
            "A failure during the copy/sort/join phases aborts the whole load. \
             All temporary files created so far have been deleted."
        )
    )]
    Aborted {
        #[source]
        source: Box<FuseError>,
    },

    #[error("corrupt intermediate file {path}: {reason}")]
    #[diagnostic(
        code(fuse::loader::corrupt),
        help(
            "An intermediate record did not have the expected shape. The working \
             directory may be shared with another process — give each run its own."
        )
    )]
    CorruptTempFile { path: PathBuf, reason: String },

    #[error("failed to create working directory under {parent}: {source}")]
    #[diagnostic(
        code(fuse::loader::workdir),
        help("Check that the parent directory exists and is writable.")
    )]
    Workspace {
        parent: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LoaderError {
    /// Wrap any pipeline failure as a load abort.
    pub fn abort(err: impl Into<FuseError>) -> Self {
        LoaderError::Aborted {
            source: Box::new(err.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("unknown resolution strategy \"{name}\"")]
    #[diagnostic(
        code(fuse::resolve::unknown_strategy),
        help(
            "Known strategies: \"keep-all\", \"keep-best\". Check the [strategies] \
             section of the config."
        )
    )]
    UnknownStrategy { name: String },

    #[error("strategy dependency cycle involving predicate <{predicate}>")]
    #[diagnostic(
        code(fuse::resolve::dependency_cycle),
        help(
            "Per-predicate `depends_on` declarations must form a DAG. \
             Remove one edge of the cycle."
        )
    )]
    DependencyCycle { predicate: String },
}

// ---------------------------------------------------------------------------
// Sink errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SinkError {
    #[error("sink write to {path} failed: {source}")]
    #[diagnostic(
        code(fuse::sink::io),
        help("Check free space and permissions on the output location.")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sink already closed")]
    #[diagnostic(
        code(fuse::sink::closed),
        help("`close()` was called; create a new sink to write more statements.")
    )]
    Closed,
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    #[diagnostic(
        code(fuse::config::io),
        help("Check the path passed on the command line.")
    )]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    #[diagnostic(
        code(fuse::config::parse),
        help("The config file must be valid TOML; the parser output pinpoints the problem.")
    )]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(fuse::config::invalid), help("{hint}"))]
    Invalid { message: String, hint: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Strategy(#[from] ResolveError),
}

/// Convenience alias for functions returning quadfuse results.
pub type FuseResult<T> = std::result::Result<T, FuseError>;
