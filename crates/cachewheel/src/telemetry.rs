// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured log events emitted by the cache.

/// Something the cache did that is worth a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheActivity {
    Added,
    Removed,
    Evicted,
    Cleanup,
    Reset,
    Cleared,
    CreateFaulted,
    DisposeFailed,
}

/// How loudly an activity is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Debug,
    Info,
    Warn,
}

impl CacheActivity {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Added => "cachewheel.added",
            Self::Removed => "cachewheel.removed",
            Self::Evicted => "cachewheel.evicted",
            Self::Cleanup => "cachewheel.cleanup",
            Self::Reset => "cachewheel.reset",
            Self::Cleared => "cachewheel.cleared",
            Self::CreateFaulted => "cachewheel.create_faulted",
            Self::DisposeFailed => "cachewheel.dispose_failed",
        }
    }

    pub(crate) fn severity(self) -> Severity {
        match self {
            Self::Added | Self::Removed | Self::Evicted | Self::Cleanup => Severity::Debug,
            Self::Reset | Self::Cleared => Severity::Info,
            Self::CreateFaulted | Self::DisposeFailed => Severity::Warn,
        }
    }
}

/// Emits a `tracing` event for an activity at the activity's severity.
///
/// Tracing levels must be known at the call site, so the level is selected with a match.
macro_rules! emit {
    ($activity:expr, $($fields:tt)*) => {{
        let activity: $crate::telemetry::CacheActivity = $activity;
        match activity.severity() {
            $crate::telemetry::Severity::Warn => {
                tracing::warn!(cache.activity = activity.as_str(), $($fields)*);
            }
            $crate::telemetry::Severity::Info => {
                tracing::info!(cache.activity = activity.as_str(), $($fields)*);
            }
            $crate::telemetry::Severity::Debug => {
                tracing::debug!(cache.activity = activity.as_str(), $($fields)*);
            }
        }
    }};
}

pub(crate) use emit;

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CacheActivity; 8] = [
        CacheActivity::Added,
        CacheActivity::Removed,
        CacheActivity::Evicted,
        CacheActivity::Cleanup,
        CacheActivity::Reset,
        CacheActivity::Cleared,
        CacheActivity::CreateFaulted,
        CacheActivity::DisposeFailed,
    ];

    #[test]
    fn activity_names_are_namespaced_and_unique() {
        let mut names: Vec<_> = ALL.iter().map(|a| a.as_str()).collect();
        assert!(names.iter().all(|n| n.starts_with("cachewheel.")));

        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL.len());
    }

    #[test]
    fn failures_are_warnings() {
        assert_eq!(CacheActivity::CreateFaulted.severity(), Severity::Warn);
        assert_eq!(CacheActivity::DisposeFailed.severity(), Severity::Warn);
        assert_eq!(CacheActivity::Evicted.severity(), Severity::Debug);
        assert_eq!(CacheActivity::Reset.severity(), Severity::Info);
    }

    #[test]
    fn emit_accepts_fields_and_message() {
        emit!(CacheActivity::Cleanup, evicted = 3_usize, "cleanup pass finished");
        emit!(CacheActivity::DisposeFailed, error = %"boom", "dispose failed");
    }
}
