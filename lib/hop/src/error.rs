use std::error;
use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, HopError>;

/// Protocol-level error: a POSIX error number paired with a description.
///
/// Errors are `Clone` because a single connection failure is delivered
/// to every request still in flight on that connection.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HopError {
    pub errnum: u32,
    pub descr: String,
}

impl HopError {
    pub fn new<D: Into<String>>(errnum: i32, descr: D) -> HopError {
        HopError {
            errnum: errnum as u32,
            descr: descr.into(),
        }
    }
}

impl fmt::Display for HopError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.descr, self.errnum)
    }
}

impl error::Error for HopError {}

impl From<io::Error> for HopError {
    fn from(err: io::Error) -> HopError {
        HopError {
            errnum: err.raw_os_error().unwrap_or(libc::EIO) as u32,
            descr: err.to_string(),
        }
    }
}
