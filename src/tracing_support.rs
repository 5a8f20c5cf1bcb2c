//! Feature-gated logging and metrics hooks.
//!
//! The macros compile to nothing unless the `tracing` feature is enabled, so
//! call sites never need their own `cfg` attributes.

macro_rules! trace {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            ::tracing::trace!($($arg)+);
        }
    };
}
pub(crate) use trace;

macro_rules! debug {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            ::tracing::debug!($($arg)+);
        }
    };
}
pub(crate) use debug;

macro_rules! warn_event {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            ::tracing::warn!($($arg)+);
        }
    };
}
pub(crate) use warn_event;

/// Increment a named counter when the `metrics` feature is enabled.
#[inline]
pub(crate) fn count(name: &'static str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(name).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = name;
}

pub(crate) const ELEMENTS_SENT: &str = "chanweld.elements_sent";
pub(crate) const ELEMENTS_RECEIVED: &str = "chanweld.elements_received";
pub(crate) const PRODUCERS_CANCELLED: &str = "chanweld.producers_cancelled";
pub(crate) const PRODUCERS_FAILED: &str = "chanweld.producers_failed";
