//! Request events used as retry triggers.
//!
//! Events form a two-rooted hierarchy:
//!
//! ```text
//! load  ─┬─ success          error ─┬─ timeout
//!        ├─ fail                    ├─ cancel
//!        ├─ status(code)            ├─ abort
//!        └─ family(class)           └─ dispatch
//! ```
//!
//! Every outcome of a dispatch produces a set of *occurred* events; a retry
//! policy fires when one of its triggers is among them.

use std::fmt;

use crate::error::{ErrorKind, RequestError};
use crate::status::{StatusFamily, is_successful};

/// An observable outcome of a request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestEvent {
    /// Any response was received.
    Load,
    /// A 2xx response was received.
    Success,
    /// A non-2xx response was received.
    Fail,
    /// A response with exactly this status code was received.
    Status(u16),
    /// A response in this status family was received.
    Family(StatusFamily),
    /// Any rejection.
    Error,
    /// The request timed out.
    Timeout,
    /// The request was cancelled.
    Cancel,
    /// The request was aborted before sending.
    Abort,
    /// An unexpected failure escaped dispatch.
    Dispatch,
}

impl RequestEvent {
    /// Returns the parent event, if any.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Load | Self::Error => None,
            Self::Success | Self::Fail | Self::Status(_) | Self::Family(_) => Some(Self::Load),
            Self::Timeout | Self::Cancel | Self::Abort | Self::Dispatch => Some(Self::Error),
        }
    }

    /// Returns true when `other` is this event or one of its descendants.
    #[must_use]
    pub fn includes(self, other: Self) -> bool {
        let mut current = Some(other);
        while let Some(event) = current {
            if event == self {
                return true;
            }
            current = event.parent();
        }
        false
    }

    /// Returns the events produced by a received response.
    #[must_use]
    pub fn from_status(status: u16) -> Vec<Self> {
        vec![
            Self::Load,
            Self::Status(status),
            Self::Family(StatusFamily::of(status)),
            if is_successful(status) {
                Self::Success
            } else {
                Self::Fail
            },
        ]
    }

    /// Returns the events produced by a rejection.
    #[must_use]
    pub fn from_error(error: &RequestError) -> Vec<Self> {
        vec![Self::Error, Self::from(error.kind())]
    }

    /// Parses an event name: `load`, `success`, `fail`, `error`, `timeout`,
    /// `cancel`, `abort`, `dispatch`, a status code (`503`) or a family (`5xx`).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let event = match name.as_str() {
            "load" => Self::Load,
            "success" => Self::Success,
            "fail" => Self::Fail,
            "error" => Self::Error,
            "timeout" => Self::Timeout,
            "cancel" => Self::Cancel,
            "abort" => Self::Abort,
            "dispatch" => Self::Dispatch,
            other => {
                if let Some(digit) = other.strip_suffix("xx") {
                    let digit: u16 = digit.parse().ok()?;
                    let family = StatusFamily::of(digit.checked_mul(100)?);
                    if family == StatusFamily::Other {
                        return None;
                    }
                    Self::Family(family)
                } else {
                    Self::Status(other.parse().ok()?)
                }
            }
        };
        Some(event)
    }
}

impl From<ErrorKind> for RequestEvent {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Abort => Self::Abort,
            ErrorKind::Cancel => Self::Cancel,
            ErrorKind::Timeout => Self::Timeout,
            ErrorKind::Dispatch => Self::Dispatch,
        }
    }
}

impl fmt::Display for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => f.write_str("load"),
            Self::Success => f.write_str("success"),
            Self::Fail => f.write_str("fail"),
            Self::Status(code) => write!(f, "{code}"),
            Self::Family(family) => write!(f, "{family}"),
            Self::Error => f.write_str("error"),
            Self::Timeout => f.write_str("timeout"),
            Self::Cancel => f.write_str("cancel"),
            Self::Abort => f.write_str("abort"),
            Self::Dispatch => f.write_str("dispatch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_load_includes_response_events() {
        assert!(RequestEvent::Load.includes(RequestEvent::Success));
        assert!(RequestEvent::Load.includes(RequestEvent::Status(404)));
        assert!(!RequestEvent::Load.includes(RequestEvent::Timeout));
        assert!(!RequestEvent::Success.includes(RequestEvent::Load));
    }

    #[test]
    fn test_error_includes_rejection_kinds() {
        assert!(RequestEvent::Error.includes(RequestEvent::Cancel));
        assert!(RequestEvent::Error.includes(RequestEvent::Error));
        assert!(!RequestEvent::Timeout.includes(RequestEvent::Abort));
    }

    #[test]
    fn test_events_from_status() {
        let events = RequestEvent::from_status(503);
        assert!(events.contains(&RequestEvent::Load));
        assert!(events.contains(&RequestEvent::Status(503)));
        assert!(events.contains(&RequestEvent::Family(StatusFamily::ServerError)));
        assert!(events.contains(&RequestEvent::Fail));
        assert!(!events.contains(&RequestEvent::Success));

        assert!(RequestEvent::from_status(201).contains(&RequestEvent::Success));
    }

    #[test]
    fn test_events_from_error() {
        let error = RequestError::timeout("http://a", Duration::from_millis(5));
        assert_eq!(
            RequestEvent::from_error(&error),
            vec![RequestEvent::Error, RequestEvent::Timeout]
        );
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(RequestEvent::parse("timeout"), Some(RequestEvent::Timeout));
        assert_eq!(RequestEvent::parse(" FAIL "), Some(RequestEvent::Fail));
        assert_eq!(RequestEvent::parse("429"), Some(RequestEvent::Status(429)));
        assert_eq!(
            RequestEvent::parse("5xx"),
            Some(RequestEvent::Family(StatusFamily::ServerError))
        );
        assert_eq!(RequestEvent::parse("9xx"), None);
        assert_eq!(RequestEvent::parse("nope"), None);
    }

    #[test]
    fn test_parse_rejects_out_of_range_family() {
        assert_eq!(RequestEvent::parse("700xx"), None);
        assert_eq!(RequestEvent::parse("65535xx"), None);
        assert_eq!(RequestEvent::parse("600xx"), None);
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for event in [
            RequestEvent::Load,
            RequestEvent::Status(418),
            RequestEvent::Family(StatusFamily::ClientError),
            RequestEvent::Dispatch,
        ] {
            assert_eq!(RequestEvent::parse(&event.to_string()), Some(event));
        }
    }
}
