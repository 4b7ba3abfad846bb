//! Data categories and their expiration policy.
//!
//! A category is a named partition of cached and queued data
//! (applications, messages, programs, ...). Each category carries its
//! own time-to-live and entry cap; unknown names fall back to
//! [`Category::Generic`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum cached entries per category before oldest-first eviction.
pub const PER_CATEGORY_CAP: usize = 100;

/// Aggregate eviction triggers at this multiple of the per-category cap.
///
/// Eviction is two-tier: per-category first, then an overall sweep, so
/// the observable eviction order matches the per-category pass.
pub const AGGREGATE_CAP_FACTOR: usize = 10;

/// A named partition of cached/queued data with its own TTL policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// The authenticated user's profile document.
    Profile,
    /// Education applications (student- or institution-scoped).
    Applications,
    /// Direct messages between portal users.
    Messages,
    /// In-app notifications.
    Notifications,
    /// Institution program listings.
    Programs,
    /// Uploaded documents (transcripts, essays, letters).
    Documents,
    /// Students assigned to a counselor.
    Students,
    /// Children linked to a parent account.
    Children,
    /// Recommendation requests assigned to a recommender.
    Requests,
    /// Aggregated analytics snapshots.
    Analytics,
    /// Fallback for category names this layer does not know about.
    Generic,
}

impl Category {
    /// All known categories, in policy-table order.
    pub const ALL: [Category; 11] = [
        Category::Profile,
        Category::Applications,
        Category::Messages,
        Category::Notifications,
        Category::Programs,
        Category::Documents,
        Category::Students,
        Category::Children,
        Category::Requests,
        Category::Analytics,
        Category::Generic,
    ];

    /// Maximum age before a cached entry in this category is treated
    /// as absent.
    #[must_use]
    pub const fn max_age(self) -> Duration {
        match self {
            Category::Profile | Category::Documents => Duration::from_secs(60 * 60),
            Category::Applications
            | Category::Students
            | Category::Children
            | Category::Requests => Duration::from_secs(30 * 60),
            Category::Messages | Category::Notifications => Duration::from_secs(15 * 60),
            Category::Programs => Duration::from_secs(2 * 60 * 60),
            Category::Analytics | Category::Generic => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// `max_age` expressed in milliseconds, the unit cache timestamps use.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // TTLs are far below u64::MAX ms
    pub const fn max_age_ms(self) -> u64 {
        self.max_age().as_millis() as u64
    }

    /// Whether entries in this category belong to the authenticated
    /// user and must be cleared on sign-out.
    ///
    /// Program listings and analytics are shared data and survive a
    /// sign-out.
    #[must_use]
    pub const fn user_scoped(self) -> bool {
        !matches!(
            self,
            Category::Programs | Category::Analytics | Category::Generic
        )
    }

    /// Resolve a category from its wire name.
    ///
    /// Unknown names map to [`Category::Generic`] so an unexpected
    /// collection still gets the documented fallback policy instead of
    /// an error.
    #[must_use]
    pub fn from_name(name: &str) -> Category {
        match name {
            "profile" => Category::Profile,
            "applications" => Category::Applications,
            "messages" => Category::Messages,
            "notifications" => Category::Notifications,
            "programs" => Category::Programs,
            "documents" => Category::Documents,
            "students" => Category::Students,
            "children" => Category::Children,
            "requests" => Category::Requests,
            "analytics" => Category::Analytics,
            _ => Category::Generic,
        }
    }

    /// The wire name of this category.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Category::Profile => "profile",
            Category::Applications => "applications",
            Category::Messages => "messages",
            Category::Notifications => "notifications",
            Category::Programs => "programs",
            Category::Documents => "documents",
            Category::Students => "students",
            Category::Children => "children",
            Category::Requests => "requests",
            Category::Analytics => "analytics",
            Category::Generic => "generic",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_names_round_trip() {
        for category in Category::ALL {
            assert_eq!(Category::from_name(category.name()), category);
        }
    }

    #[test]
    fn test_unknown_name_falls_back_to_generic() {
        assert_eq!(Category::from_name("institutions"), Category::Generic);
        assert_eq!(Category::from_name(""), Category::Generic);
    }

    #[test]
    fn test_ttl_table() {
        assert_eq!(Category::Profile.max_age(), Duration::from_secs(3600));
        assert_eq!(Category::Messages.max_age(), Duration::from_secs(900));
        assert_eq!(Category::Programs.max_age(), Duration::from_secs(7200));
        assert_eq!(Category::Generic.max_age(), Duration::from_secs(86400));
    }

    #[test]
    fn test_user_scoping() {
        assert!(Category::Profile.user_scoped());
        assert!(Category::Applications.user_scoped());
        assert!(Category::Messages.user_scoped());
        assert!(!Category::Programs.user_scoped());
        assert!(!Category::Analytics.user_scoped());
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&Category::Applications).expect("serialize");
        assert_eq!(json, "\"applications\"");
    }
}
