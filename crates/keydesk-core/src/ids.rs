//! Type-safe identifiers.
//!
//! Keys, users and channels are all plain strings on the wire. Wrapping them
//! keeps a borrower id from ever being compared against a channel id.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the underlying string reference.
            pub fn as_str(&self) -> &str {
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
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Number printed on a physical access card (e.g. "13").
    ///
    /// Parsed straight out of chat text, so it is not guaranteed to be part
    /// of the inventory. The ledger rejects unknown keys.
    KeyId
}

string_id! {
    /// Opaque chat platform user identifier (e.g. "U024BE7LH").
    UserId
}

impl UserId {
    /// Renders the platform mention token for this user, `<@U024BE7LH>`.
    #[must_use]
    pub fn mention(&self) -> String {
        format!("<@{}>", self.0)
    }
}

string_id! {
    /// Opaque chat platform channel identifier (e.g. "C2147483705").
    ChannelId
}
