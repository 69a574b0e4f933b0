//! # Error types used by the bus and its topology operations.
//!
//! Three shapes cover the whole surface:
//!
//! - [`NotReady`] topology operation could not complete yet; when the caller
//!   supplied a watcher it was parked and fires on the next topology change.
//! - [`SendError`] a put on a draining route; hands the rejected message
//!   back to the caller.
//! - [`Draining`] a route destroy deferred until the consumer drains it.
//!
//! All types provide `as_label` for stable snake_case labels in logs.

use std::fmt;

use thiserror::Error;

/// A topology operation found the bus in a state it must wait out.
///
/// The operation can be retried after the parked watcher fires; the
/// `*_blocking` rendezvous wrappers do exactly that.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotReady {
    /// A peak with this name is already attached to the bus.
    #[error("peak name '{name}' is already attached")]
    NameTaken {
        /// The contested peak name.
        name: String,
    },
    /// No peak with this name is attached, so a route cannot target it.
    #[error("no peak named '{name}' is attached")]
    NoSuchPeak {
        /// The requested peak name.
        name: String,
    },
    /// The bus cannot close while peaks remain attached.
    #[error("peaks are still attached to the bus")]
    PeaksRemain,
}

impl NotReady {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            NotReady::NameTaken { .. } => "name_taken",
            NotReady::NoSuchPeak { .. } => "no_such_peak",
            NotReady::PeaksRemain => "peaks_remain",
        }
    }
}

/// A route destroy was deferred: the ring still holds undelivered messages.
///
/// The route stops accepting puts immediately; the consumer drains what is
/// left and then frees the route, firing the exit watcher the caller
/// supplied.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("route still holds undelivered messages; exit watcher parked")]
pub struct Draining;

impl Draining {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        "route_draining"
    }
}

/// A put was refused because the route is draining.
///
/// Carries the rejected message so ownership returns to the caller, in the
/// manner of `std::sync::mpsc::SendError`.
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Recovers the rejected message.
    pub fn into_inner(self) -> T {
        self.0
    }

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        "route_exiting"
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("route is draining; no further messages accepted")
    }
}

impl<T> std::error::Error for SendError<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        let taken = NotReady::NameTaken { name: "tx".into() };
        assert_eq!(taken.as_label(), "name_taken");
        assert_eq!(
            NotReady::NoSuchPeak { name: "tx".into() }.as_label(),
            "no_such_peak"
        );
        assert_eq!(NotReady::PeaksRemain.as_label(), "peaks_remain");
        assert_eq!(Draining.as_label(), "route_draining");
        assert_eq!(SendError(()).as_label(), "route_exiting");
    }

    #[test]
    fn send_error_returns_the_message() {
        let err = SendError(vec![1, 2, 3]);
        assert_eq!(err.into_inner(), vec![1, 2, 3]);
    }

    #[test]
    fn display_names_the_condition() {
        assert!(SendError(0u8).to_string().contains("draining"));
        assert!(NotReady::PeaksRemain.to_string().contains("attached"));
    }
}
