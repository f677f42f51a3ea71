//! Definition of error and status.

use std::error::Error;
use std::fmt;

/// Status of `HazardEpoch`
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Status {
    /// Success
    Success,
    /// Current thread has already assigned a version handle
    Busy,
    /// Thread number overflow
    ThreadNumOverflow,
    /// Invalid parameter
    InvalidParam,
}

impl Status {
    /// Return true if `Success`.
    #[inline]
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error for Status {}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn test_base() {
        let s = Status::Success;
        let a = format!("{}", s);
        assert_eq!(a, "Success");
        assert!(s.is_success());
        assert!(!Status::ThreadNumOverflow.is_success());
        assert_eq!(format!("{}", Status::Busy), "Busy");
    }
}
