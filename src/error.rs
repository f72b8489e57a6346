use std::fmt;
use std::io;

/// Failure taxonomy of the acquisition-and-control core.
///
/// `ConnectionBroken` and `Protocol` are fatal to the current connection
/// (never to the process); `InsufficientData` and
/// `OptimizationDidNotConverge` are recoverable and carry enough context for
/// the caller to retry or proceed best-effort.
#[derive(Debug)]
pub enum Error {
    /// A recv returned zero bytes before the requested size was satisfied.
    ConnectionBroken,
    /// Header or payload failed to parse as the fixed RDA layout.
    Protocol(String),
    /// The rolling buffer does not yet hold enough non-placeholder samples.
    InsufficientData { needed: usize, available: usize },
    /// The coefficient search hit its iteration ceiling. The coefficient is
    /// the best estimate found so far and is usable, but must be flagged.
    OptimizationDidNotConverge { coefficient: f64, iterations: usize },
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionBroken => write!(f, "connection broken"),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::InsufficientData { needed, available } => write!(
                f,
                "insufficient data: needed {} samples, have {}",
                needed, available
            ),
            Error::OptimizationDidNotConverge {
                coefficient,
                iterations,
            } => write!(
                f,
                "optimization did not converge after {} iterations (best d = {})",
                iterations, coefficient
            ),
            Error::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
