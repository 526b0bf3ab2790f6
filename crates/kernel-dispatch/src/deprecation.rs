//! Once-per-process deprecation notices.

use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;

use crate::config::DispatchConfig;

/// A warning that is logged at most once per process, no matter how many threads race to
/// emit it.
#[derive(Debug)]
pub struct DeprecationNotice {
    name: &'static str,
    message: &'static str,
    emitted: AtomicBool,
}

impl DeprecationNotice {
    pub const fn new(name: &'static str, message: &'static str) -> Self {
        DeprecationNotice {
            name,
            message,
            emitted: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn message(&self) -> &'static str {
        self.message
    }

    /// Logs the notice unless it already fired or warnings are disabled.
    /// Returns `true` only for the call that actually logged it.
    pub fn emit(&self, config: &DispatchConfig) -> bool {
        if !config.deprecation_warnings {
            return false;
        }
        if self.emitted.swap(true, Ordering::AcqRel) {
            return false;
        }
        warn!("{}: {}", self.name, self.message);
        true
    }

    pub fn has_fired(&self) -> bool {
        self.emitted.load(Ordering::Acquire)
    }
}

pub static GELS_DEPRECATION: DeprecationNotice = DeprecationNotice::new(
    "gels",
    "gels is deprecated in favor of a least-squares solve with reversed arguments (A, B) \
     and will be removed in a future release; the replacement does not return the QR \
     factorization",
);

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn fires_once_across_threads() {
        let notice = Arc::new(DeprecationNotice::new("demo", "demo is going away"));
        let config = DispatchConfig::default();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let notice = Arc::clone(&notice);
                let config = config.clone();
                thread::spawn(move || notice.emit(&config))
            })
            .collect();
        let fired = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|fired| *fired)
            .count();
        assert_eq!(fired, 1);
        assert!(notice.has_fired());
    }

    #[test]
    fn disabled_warnings_leave_notice_armed() {
        let notice = DeprecationNotice::new("demo", "demo is going away");
        let quiet = DispatchConfig::default().with_deprecation_warnings(false);
        assert!(!notice.emit(&quiet));
        assert!(!notice.has_fired());
        assert!(notice.emit(&DispatchConfig::default()));
    }
}
