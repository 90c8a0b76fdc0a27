//! Helpers for non-blocking IO.

use std::io;

use crate::error::{Error, Result};

/// Extension for results of IO-backed calls that treats `WouldBlock` as
/// "not ready" instead of an error.
pub trait NonBlockingResult {
    /// Type of the converted result.
    type Result;
    /// Convert, mapping `WouldBlock` to `Ok(None)`.
    fn no_block(self) -> Self::Result;
}

impl<T> NonBlockingResult for Result<T> {
    type Result = Result<Option<T>>;

    fn no_block(self) -> Self::Result {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(Error::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }
}
