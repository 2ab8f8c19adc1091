//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`WorkerId`] with an [`AgentName`] even though both are strings under the
//! hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty
            /// or whitespace only.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.trim().is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers — UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single task within a task pool.
///
/// Generated fresh by the pool on creation and propagated through spans and
/// cost entries so all activity for one task can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a new random task identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a [`TaskId`] from an existing UUID (e.g. read back from a store).
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parses a [`TaskId`] from its hyphenated string form.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers — String-backed (configuration / provider names)
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies a worker registered with a swarm.
    ///
    /// Recorded as the `assigned_agent` of every task the worker claims.
    WorkerId
}

string_id! {
    /// Name of the agent (persona) a cost entry is attributed to.
    AgentName
}

string_id! {
    /// A provider model name as sent on the wire (e.g. `"gpt-4o-mini"`).
    ModelName
}

string_id! {
    /// Human-readable provider label used in error messages and logs
    /// (e.g. `"openai"`).
    ProviderName
}

string_id! {
    /// Fingerprint of a deterministic completion request (lowercase hex digest).
    CacheKey
}
