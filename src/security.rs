//! Abuse detection hooks: the ban list and the suspicion checks.
//!
//! The connection loop consults a [`BanList`] before parsing anything from a
//! new connection, and bans addresses that exceed limits or trip a
//! [`Suspicion`] check. [`Brig`] and [`Watchlist`] are the in-memory
//! defaults; a server built without custom ones uses them.

use crate::limits::SecurityLimits;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Remembers which clients are temporarily refused.
///
/// Keys are free-form strings; the server uses `"<ip>_vuln_seeking"`.
pub trait BanList: Send + Sync + 'static {
    fn is_banned(&self, key: &str) -> bool;

    /// Bans `key` for `duration`, extending an existing ban.
    fn ban(&self, key: &str, duration: Duration);
}

/// Decides whether a request or an error looks like probing.
///
/// Both methods return the reason when they match.
pub trait Suspicion: Send + Sync + 'static {
    fn suspicious_path(&self, isolated_path: &str) -> Option<String>;

    fn suspicious_error(&self, message: &str) -> Option<String>;
}

/// In-memory [`BanList`]. Bans expire on their own.
#[derive(Debug, Default)]
pub struct Brig {
    inmates: DashMap<String, Instant>,
}

impl Brig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current bans with the time each has left.
    pub fn inmates(&self) -> Vec<(String, Duration)> {
        let now = Instant::now();
        self.inmates
            .iter()
            .filter(|entry| *entry.value() > now)
            .map(|entry| (entry.key().clone(), *entry.value() - now))
            .collect()
    }

    /// Drops expired bans, returning how many were released.
    pub fn release_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inmates.len();
        self.inmates.retain(|_, release| *release > now);
        before - self.inmates.len()
    }
}

impl BanList for Brig {
    fn is_banned(&self, key: &str) -> bool {
        let Some(release) = self.inmates.get(key).map(|entry| *entry.value()) else {
            return false;
        };

        if release > Instant::now() {
            return true;
        }

        self.inmates.remove_if(key, |_, release| *release <= Instant::now());
        false
    }

    fn ban(&self, key: &str, duration: Duration) {
        let release = Instant::now() + duration;
        tracing::debug!("banning {key} for {duration:?}");

        self.inmates
            .entry(key.to_string())
            .and_modify(|current| *current = (*current).max(release))
            .or_insert(release);
    }
}

/// [`Suspicion`] driven by two lists of strings.
///
/// Paths match by equality with the isolated path; errors match when the
/// message contains one of the fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watchlist {
    paths: Vec<String>,
    errors: Vec<String>,
}

impl Watchlist {
    pub fn new(paths: Vec<String>, errors: Vec<String>) -> Self {
        Self { paths, errors }
    }

    pub fn from_limits(limits: &SecurityLimits) -> Self {
        Self::new(limits.suspicious_paths.clone(), limits.suspicious_errors.clone())
    }
}

impl Suspicion for Watchlist {
    fn suspicious_path(&self, isolated_path: &str) -> Option<String> {
        self.paths
            .iter()
            .find(|path| path.as_str() == isolated_path)
            .map(|path| format!("client requested a suspicious path: {path}"))
    }

    fn suspicious_error(&self, message: &str) -> Option<String> {
        self.errors
            .iter()
            .find(|fragment| message.contains(fragment.as_str()))
            .map(|fragment| format!("error message matched {fragment:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bans_expire() {
        let brig = Brig::new();
        brig.ban("1.2.3.4_vuln_seeking", Duration::from_millis(30));
        brig.ban("5.6.7.8_vuln_seeking", Duration::from_secs(60));

        assert!(brig.is_banned("1.2.3.4_vuln_seeking"));
        assert!(!brig.is_banned("9.9.9.9_vuln_seeking"));
        assert_eq!(brig.inmates().len(), 2);

        std::thread::sleep(Duration::from_millis(50));
        assert!(!brig.is_banned("1.2.3.4_vuln_seeking"));
        assert!(brig.is_banned("5.6.7.8_vuln_seeking"));
        assert_eq!(brig.release_expired(), 0);
        assert_eq!(brig.inmates().len(), 1);
    }

    #[test]
    fn bans_only_extend() {
        let brig = Brig::new();
        brig.ban("a", Duration::from_secs(60));
        brig.ban("a", Duration::from_millis(1));

        std::thread::sleep(Duration::from_millis(10));
        assert!(brig.is_banned("a"));
    }

    #[test]
    fn watchlist() {
        let watchlist = Watchlist::from_limits(&SecurityLimits {
            suspicious_paths: vec![".env".into(), "owa/auth/logon.aspx".into()],
            suspicious_errors: vec!["no cipher suites in common".into()],
            ..SecurityLimits::default()
        });

        #[rustfmt::skip]
        let paths = [
            (".env",                 true),
            ("owa/auth/logon.aspx",  true),
            ("app/.env",             false),
            ("",                     false),
        ];

        for (path, suspicious) in paths {
            assert_eq!(watchlist.suspicious_path(path).is_some(), suspicious, "{path}");
        }

        assert!(watchlist
            .suspicious_error("handshake failed: no cipher suites in common")
            .is_some());
        assert!(watchlist.suspicious_error("connection reset by peer").is_none());
    }
}
