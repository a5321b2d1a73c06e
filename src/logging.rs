//! Tracing setup for wirebox
//!
//! Every event this crate emits carries `target: "wirebox"` and falls
//! into one of three bands: wiring and injector lifecycle at DEBUG
//! (register, include, freeze, scope and injector creation, reset),
//! per-resolution steps at TRACE (candidate selection, composition,
//! binding), and failures at WARN (release and autoload errors). This
//! module maps those bands onto a [`Verbosity`] and produces the
//! matching subscriber filter.
//!
//! A library should rarely own the global subscriber, so the primary
//! entry point is [`directive`]: fold it into the application's own
//! filter.
//!
//! ```rust,ignore
//! use tracing_subscriber::{EnvFilter, fmt, prelude::*};
//! use wirebox::logging::{self, Verbosity};
//!
//! let filter = EnvFilter::new(format!(
//!     "info,{}",
//!     logging::directive(Verbosity::Resolution)
//! ));
//! tracing_subscriber::registry()
//!     .with(filter)
//!     .with(fmt::layer())
//!     .init();
//! ```
//!
//! For quick setups (tests, examples, small binaries) enable the
//! `logging-pretty` or `logging-json` feature and call [`init`].

use tracing::Level;

/// Target attached to every event this crate emits.
pub const TARGET: &str = "wirebox";

/// How much of the runtime to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Release and autoload failures only
    Quiet,
    /// Wiring and injector lifecycle
    #[default]
    Wiring,
    /// Every resolution and binding step
    Resolution,
}

impl Verbosity {
    /// The level band this verbosity corresponds to.
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::WARN,
            Self::Wiring => Level::DEBUG,
            Self::Resolution => Level::TRACE,
        }
    }
}

/// Filter directive confining a subscriber to this crate's events,
/// e.g. `wirebox=debug`.
pub fn directive(verbosity: Verbosity) -> String {
    format!("{TARGET}={}", verbosity.level())
}

/// Install a global subscriber showing only wirebox events: JSON output
/// with `logging-json`, pretty output with `logging-pretty`.
///
/// Does nothing when a subscriber is already installed, so tests may
/// call it repeatedly.
#[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
pub fn init(verbosity: Verbosity) {
    init_with(&directive(verbosity));
}

/// Install a global subscriber from a raw filter directive, for mixing
/// wirebox events into application logs (e.g. `"info,wirebox=trace"`).
#[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
pub fn init_with(filter: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::new(filter);

    #[cfg(feature = "logging-json")]
    {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init();
    }
    #[cfg(all(feature = "logging-pretty", not(feature = "logging-json")))]
    {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty().with_target(true))
            .try_init();
    }
}

/// No-op without a subscriber feature; pass [`directive`] to your own
/// subscriber instead.
#[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
pub fn init(_verbosity: Verbosity) {}

/// No-op without a subscriber feature.
#[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
pub fn init_with(_filter: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_onto_level_bands() {
        assert_eq!(Verbosity::Quiet.level(), Level::WARN);
        assert_eq!(Verbosity::Wiring.level(), Level::DEBUG);
        assert_eq!(Verbosity::Resolution.level(), Level::TRACE);
        assert_eq!(Verbosity::default(), Verbosity::Wiring);
    }

    #[test]
    fn directive_is_scoped_to_the_crate_target() {
        let resolution = directive(Verbosity::Resolution);
        assert!(resolution.starts_with(TARGET));
        assert!(resolution.to_lowercase().ends_with("trace"));

        let quiet = directive(Verbosity::Quiet);
        assert!(quiet.to_lowercase().ends_with("warn"));
    }
}
