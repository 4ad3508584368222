//! Branded ID newtypes for accounts, bundles, subscriptions, and events.
//!
//! Each entity gets a distinct ID type wrapping a `String`, so a bundle ID
//! can never be passed where a subscription ID is expected. Freshly minted
//! IDs are UUID v7 (time-ordered) from [`uuid::Uuid::now_v7`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Wrap an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Borrow the inner string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a customer account (owner of bundles).
    AccountId
}

branded_id! {
    /// Identifier of a subscription bundle.
    BundleId
}

branded_id! {
    /// Identifier of a subscription within a bundle.
    SubscriptionId
}

branded_id! {
    /// Identifier of a persisted (or synthetic) entitlement event.
    EventId
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_new_is_uuid_v7() {
        let id = EventId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn subscription_id_new_is_uuid_v7() {
        let id = SubscriptionId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        let a = BundleId::new();
        let b = BundleId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_str_ref_and_display() {
        let id = AccountId::from("acct-1");
        assert_eq!(id.as_str(), "acct-1");
        assert_eq!(format!("{id}"), "acct-1");
    }

    #[test]
    fn deref_to_str() {
        let id = EventId::from("hello");
        let s: &str = &id;
        assert_eq!(s, "hello");
    }

    #[test]
    fn serde_is_transparent() {
        let id = SubscriptionId::from("sub-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sub-1\"");
        let back: SubscriptionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ordering_follows_string_order() {
        let mut ids = vec![EventId::from("b"), EventId::from("a"), EventId::from("c")];
        ids.sort();
        assert_eq!(ids, vec![EventId::from("a"), EventId::from("b"), EventId::from("c")]);
    }

    #[test]
    fn into_inner() {
        let id = BundleId::from("inner-test");
        assert_eq!(id.into_inner(), "inner-test");
    }
}
