use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building caches or reading their inputs
///
/// Simulation itself is infallible; everything here happens before the first insert
#[derive(Error, Debug)]
pub enum Error {
    /// The replacement policy name didn't match any known policy
    #[error("Unknown replacement policy: {0}")]
    UnknownPolicy(String),

    /// The requested cache shape can't be allocated
    #[error("Invalid cache geometry: {ways} ways, index width {idx_width}")]
    InvalidGeometry { ways: usize, idx_width: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't parse the config file: {0}")]
    Config(#[from] serde_json::Error),

    /// A trace line that isn't a hexadecimal address
    #[error("Malformed trace line {line}: {content:?}")]
    TraceParse { line: usize, content: String },
}
