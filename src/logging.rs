//! A process-wide verbosity sticky value. The library never
//! installs a global subscriber on its own -- callers embedding it in a
//! larger application bring their own -- but [`install_default_subscriber`]
//! is offered for standalone binaries and tests.

use std::sync::atomic::{AtomicU8, Ordering};

use tracing::level_filters::LevelFilter;

/// Mirrors the environment-level verbosity enumeration from the external
/// interface: affects only diagnostic output, never behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Verbosity {
    None = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
}

impl Verbosity {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Verbosity::None,
            1 => Verbosity::Error,
            2 => Verbosity::Warning,
            3 => Verbosity::Info,
            _ => Verbosity::Debug,
        }
    }

    fn to_level_filter(self) -> LevelFilter {
        match self {
            Verbosity::None => LevelFilter::OFF,
            Verbosity::Error => LevelFilter::ERROR,
            Verbosity::Warning => LevelFilter::WARN,
            Verbosity::Info => LevelFilter::INFO,
            Verbosity::Debug => LevelFilter::TRACE,
        }
    }
}

static VERBOSITY: AtomicU8 = AtomicU8::new(Verbosity::Warning as u8);

/// Set the process-wide sticky verbosity. Only affects
/// [`install_default_subscriber`]'s filter; a host-installed subscriber
/// makes its own filtering decisions and ignores this value.
pub fn set_verbosity(level: Verbosity) {
    VERBOSITY.store(level as u8, Ordering::Relaxed);
}

pub fn verbosity() -> Verbosity {
    Verbosity::from_u8(VERBOSITY.load(Ordering::Relaxed))
}

/// Install a bare `fmt` subscriber filtered at the current [`verbosity`].
/// Intended for standalone binaries and test harnesses; a caller embedding
/// this crate in a larger application with its own `tracing` setup should
/// not call this.
pub fn install_default_subscriber() {
    let _ = tracing_subscriber::fmt().with_max_level(verbosity().to_level_filter()).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_round_trips_through_the_sticky_value() {
        set_verbosity(Verbosity::Debug);
        assert_eq!(verbosity(), Verbosity::Debug);
        set_verbosity(Verbosity::Warning);
        assert_eq!(verbosity(), Verbosity::Warning);
    }

    #[test]
    fn ordering_matches_severity() {
        assert!(Verbosity::None < Verbosity::Error);
        assert!(Verbosity::Error < Verbosity::Debug);
    }
}
