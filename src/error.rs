//! Rich diagnostic error types for kgscope.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so operators know what
//! went wrong and which capability (store, model, disk) to look at.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for kgscope.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the caller. Capability failures are carried unmodified.
#[derive(Debug, Error, Diagnostic)]
pub enum ScopeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Escape(#[from] EscapeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Graph store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("graph store `{backend}` unavailable during {operation} (entity: {entity}): {message}")]
    #[diagnostic(
        code(kgscope::store::unavailable),
        help(
            "The graph store could not be reached or timed out. The current request \
             was aborted; retry once the store is reachable. kgscope does not retry \
             store calls on its own."
        )
    )]
    Unavailable {
        backend: String,
        operation: String,
        entity: String,
        message: String,
    },

    #[error("graph store `{backend}` rejected {operation}: {message}")]
    #[diagnostic(
        code(kgscope::store::query),
        help("The store answered but reported an error. Check the store logs and the query shape.")
    )]
    Query {
        backend: String,
        operation: String,
        message: String,
    },

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(kgscope::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(kgscope::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             Rebuild the store from the checkpoint directory if the file is corrupted."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(kgscope::store::serde),
        help(
            "Failed to serialize or deserialize stored data. \
             The stored format may have changed between versions; re-upload the graph."
        )
    )]
    Serialization { message: String },

    #[error("identifier {identifier:?} cannot cross the `{backend}` wire boundary: {message}")]
    #[diagnostic(
        code(kgscope::store::invalid_identifier),
        help(
            "Entity ids and relation labels must be non-empty, and names read back \
             from the store must be valid escaped identifiers."
        )
    )]
    InvalidIdentifier {
        backend: String,
        identifier: String,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Language model errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("language model is not available at {url}")]
    #[diagnostic(
        code(kgscope::llm::unavailable),
        help("Start the model server (e.g. `ollama serve`) and make sure the model is pulled.")
    )]
    Unavailable { url: String },

    #[error("language model request for {operation} failed: {message}")]
    #[diagnostic(
        code(kgscope::llm::request_failed),
        help("Check that the model server is running and the configured model exists.")
    )]
    RequestFailed { operation: String, message: String },

    #[error("language model request for {operation} timed out after {timeout_secs}s")]
    #[diagnostic(
        code(kgscope::llm::timeout),
        help("Increase `llm.timeout_secs` or use a smaller model.")
    )]
    Timeout { operation: String, timeout_secs: u64 },

    #[error("language model output for {operation} violates its contract: {message}")]
    #[diagnostic(
        code(kgscope::llm::contract_violation),
        help("The model answered in an unexpected shape. Try a stronger model or retry.")
    )]
    ContractViolation { operation: String, message: String },
}

// ---------------------------------------------------------------------------
// Checkpoint errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint collision: {path} exists for hash {hash} but holds different text")]
    #[diagnostic(
        code(kgscope::checkpoint::collision),
        help(
            "Two different chunks hash to the same checkpoint, or the checkpoint file was \
             edited. Inspect the file and remove it manually before re-running ingestion."
        )
    )]
    Collision { hash: String, path: String },

    #[error("checkpoint I/O error at {path}: {source}")]
    #[diagnostic(
        code(kgscope::checkpoint::io),
        help("Check that the checkpoint directory exists and is writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed checkpoint {path}: {message}")]
    #[diagnostic(
        code(kgscope::checkpoint::serde),
        help("The checkpoint file is not a valid chunk record. Delete it to reprocess the chunk.")
    )]
    Serialization { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Source index errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    #[error("index I/O error at {path}: {source}")]
    #[diagnostic(
        code(kgscope::index::io),
        help("Check that the index file exists and is readable. Rebuild it with `kgscope index`.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed index {path}: {message}")]
    #[diagnostic(
        code(kgscope::index::serde),
        help("The index file is not valid JSON. Rebuild it with `kgscope index`.")
    )]
    Serialization { path: String, message: String },

    #[error("malformed triple key in index: {key}")]
    #[diagnostic(
        code(kgscope::index::malformed_key),
        help("Index keys must look like (\"subject\", \"relation\", \"object\").")
    )]
    MalformedKey { key: String },
}

// ---------------------------------------------------------------------------
// Label tree errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LabelError {
    #[error("label cache I/O error at {path}: {source}")]
    #[diagnostic(
        code(kgscope::label::io),
        help("Check that the label cache path is writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed label cache {path}: {message}")]
    #[diagnostic(
        code(kgscope::label::serde),
        help("Delete the label cache to force a rebuild with `kgscope labels build --refresh`.")
    )]
    Serialization { path: String, message: String },

    #[error("label tree has not been built")]
    #[diagnostic(
        code(kgscope::label::not_built),
        help("Run `kgscope labels build` first.")
    )]
    NotBuilt,
}

// ---------------------------------------------------------------------------
// Escaping errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EscapeError {
    #[error("unknown escape token `_{token}_` in {input:?}")]
    #[diagnostic(
        code(kgscope::escape::unknown_token),
        help("The identifier was not produced by `to_escape`; it may come from another writer.")
    )]
    UnknownToken { input: String, token: String },

    #[error("unterminated escape token in {input:?}")]
    #[diagnostic(
        code(kgscope::escape::unterminated),
        help("Every `_` in an escaped identifier must open a complete `_xx_` token.")
    )]
    Unterminated { input: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(kgscope::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(kgscope::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(kgscope::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("{operation} was cancelled")]
    #[diagnostic(
        code(kgscope::engine::cancelled),
        help("The operation was aborted between steps. Nothing was persisted.")
    )]
    Cancelled { operation: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(kgscope::engine::invalid_config),
        help("Fix the named field in the configuration file.")
    )]
    InvalidConfig { message: String },

    #[error("graph extraction failed for chunk {hash}: {message}")]
    #[diagnostic(
        code(kgscope::engine::extraction),
        help("Set `ingest.skip_errors = true` to record the failure and continue with an empty graph.")
    )]
    Extraction { hash: String, message: String },

    #[error("cannot create data directory: {path}")]
    #[diagnostic(
        code(kgscope::engine::data_dir),
        help("Ensure the parent directory exists and you have write permissions.")
    )]
    DataDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read input document: {path}")]
    #[diagnostic(
        code(kgscope::engine::input),
        help("Check the path and that the file is UTF-8 text.")
    )]
    Input {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias for functions returning kgscope results.
pub type ScopeResult<T> = std::result::Result<T, ScopeError>;
