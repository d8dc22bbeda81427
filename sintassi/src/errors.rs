//! Definition of errors.

use std::error::Error;
use std::fmt;

pub type Result<T, E = SintassiError> = std::result::Result<T, E>;

/// Errors produced by training, model I/O and input validation.
///
/// A parse that finds no derivation is not an error; see [`crate::ParseOutcome`].
#[derive(Debug)]
pub enum SintassiError {
    InvalidArgument(InvalidArgumentError),
    InvalidGrammar(InvalidGrammarError),
    InvalidModel(InvalidModelError),
    InvalidFormat(InvalidFormatError),
    Numerical(NumericalError),
    EncodeError(bincode::error::EncodeError),
    IOError(std::io::Error),
}

impl SintassiError {
    pub(crate) fn invalid_argument<S>(arg: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidArgument(InvalidArgumentError {
            arg,
            msg: msg.into(),
        })
    }

    pub(crate) fn invalid_grammar<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidGrammar(InvalidGrammarError { msg: msg.into() })
    }

    pub(crate) fn invalid_model<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidModel(InvalidModelError { msg: msg.into() })
    }

    pub(crate) fn invalid_format<S>(what: &'static str, msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::InvalidFormat(InvalidFormatError {
            what,
            msg: msg.into(),
        })
    }

    pub(crate) fn numerical<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Self::Numerical(NumericalError { msg: msg.into() })
    }
}

impl fmt::Display for SintassiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidArgument(e) => e.fmt(f),
            Self::InvalidGrammar(e) => e.fmt(f),
            Self::InvalidModel(e) => e.fmt(f),
            Self::InvalidFormat(e) => e.fmt(f),
            Self::Numerical(e) => e.fmt(f),
            Self::EncodeError(e) => e.fmt(f),
            Self::IOError(e) => e.fmt(f),
        }
    }
}

impl Error for SintassiError {}

/// Error used when the argument is invalid.
#[derive(Debug)]
pub struct InvalidArgumentError {
    /// Name of the argument.
    pub(crate) arg: &'static str,

    /// Error message.
    pub(crate) msg: String,
}

impl fmt::Display for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidArgumentError: {}: {}", self.arg, self.msg)
    }
}

impl Error for InvalidArgumentError {}

/// Error used when a grammar violates its invariants.
#[derive(Debug)]
pub struct InvalidGrammarError {
    pub(crate) msg: String,
}

impl fmt::Display for InvalidGrammarError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidGrammarError: {}", self.msg)
    }
}

impl Error for InvalidGrammarError {}

/// Error used when the model is invalid.
#[derive(Debug)]
pub struct InvalidModelError {
    /// Error message.
    pub(crate) msg: String,
}

impl fmt::Display for InvalidModelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidModelError: {}", self.msg)
    }
}

impl Error for InvalidModelError {}

/// Error used when a textual input cannot be read.
#[derive(Debug)]
pub struct InvalidFormatError {
    /// Kind of the input.
    pub(crate) what: &'static str,

    /// Error message.
    pub(crate) msg: String,
}

impl fmt::Display for InvalidFormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidFormatError: {}: {}", self.what, self.msg)
    }
}

impl Error for InvalidFormatError {}

/// Error used when training leaves the range of finite floating-point values.
#[derive(Debug)]
pub struct NumericalError {
    pub(crate) msg: String,
}

impl fmt::Display for NumericalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NumericalError: {}", self.msg)
    }
}

impl Error for NumericalError {}

impl From<bincode::error::EncodeError> for SintassiError {
    fn from(error: bincode::error::EncodeError) -> Self {
        Self::EncodeError(error)
    }
}

impl From<std::io::Error> for SintassiError {
    fn from(error: std::io::Error) -> Self {
        Self::IOError(error)
    }
}
