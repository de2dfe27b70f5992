//! HTTP status classification.
//!
//! A response is *successful* iff its status code is in `[200, 300)`.
//! Everything else is a delivered-but-unsuccessful response: it still
//! resolves the deferred, and callers tell the two apart by inspecting the
//! status, never by error type.

use std::fmt;

/// Returns true when `status` is in the 2xx range.
#[must_use]
pub fn is_successful(status: u16) -> bool {
    (200..300).contains(&status)
}

/// The class of an HTTP status code, given by its first digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusFamily {
    /// 1xx
    Informational,
    /// 2xx
    Successful,
    /// 3xx
    Redirection,
    /// 4xx
    ClientError,
    /// 5xx
    ServerError,
    /// Anything outside 100..=599.
    Other,
}

impl StatusFamily {
    /// Classifies a status code into its family.
    #[must_use]
    pub fn of(status: u16) -> Self {
        match status / 100 {
            1 => Self::Informational,
            2 => Self::Successful,
            3 => Self::Redirection,
            4 => Self::ClientError,
            5 => Self::ServerError,
            _ => Self::Other,
        }
    }

    /// Returns the leading digit shared by every status of this family.
    #[must_use]
    pub fn digit(self) -> Option<u16> {
        match self {
            Self::Informational => Some(1),
            Self::Successful => Some(2),
            Self::Redirection => Some(3),
            Self::ClientError => Some(4),
            Self::ServerError => Some(5),
            Self::Other => None,
        }
    }

    /// Returns true when `status` belongs to this family.
    #[must_use]
    pub fn contains(self, status: u16) -> bool {
        Self::of(status) == self
    }
}

impl fmt::Display for StatusFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.digit() {
            Some(digit) => write!(f, "{digit}xx"),
            None => f.write_str("other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_successful_bounds() {
        assert!(!is_successful(199));
        assert!(is_successful(200));
        assert!(is_successful(204));
        assert!(is_successful(299));
        assert!(!is_successful(300));
        assert!(!is_successful(404));
    }

    #[test]
    fn test_family_of_each_class() {
        assert_eq!(StatusFamily::of(101), StatusFamily::Informational);
        assert_eq!(StatusFamily::of(201), StatusFamily::Successful);
        assert_eq!(StatusFamily::of(304), StatusFamily::Redirection);
        assert_eq!(StatusFamily::of(429), StatusFamily::ClientError);
        assert_eq!(StatusFamily::of(503), StatusFamily::ServerError);
        assert_eq!(StatusFamily::of(0), StatusFamily::Other);
        assert_eq!(StatusFamily::of(700), StatusFamily::Other);
    }

    #[test]
    fn test_family_display_and_contains() {
        assert_eq!(StatusFamily::ClientError.to_string(), "4xx");
        assert_eq!(StatusFamily::Other.to_string(), "other");
        assert!(StatusFamily::ServerError.contains(500));
        assert!(!StatusFamily::ServerError.contains(499));
    }
}
