//! Identifiers
//!
//! String newtypes for every id that crosses the protocol boundary. They
//! serialize transparently so they can sit directly in wire frames.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the raw string value
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Tenant scope (institution / organization) a connection belongs to
    TenantId
);

string_id!(
    /// Server-issued conversation identifier
    ConversationId
);

string_id!(
    /// Correlation id returned by the submission call; keys a stream session
    CorrelationId
);

string_id!(
    /// Server id of the persisted user message
    UserMessageId
);

string_id!(
    /// Client-minted conversation id used before the server knows the conversation
    PlaceholderId
);

impl PlaceholderId {
    /// Mint a fresh placeholder id
    #[must_use]
    pub fn new() -> Self {
        Self(format!("local-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for PlaceholderId {
    fn default() -> Self {
        Self::new()
    }
}

/// The conversation a caller wants to talk to
///
/// Placeholders must be promoted to a server id before joining the room,
/// since the server only routes push events for conversations it knows.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConversationRef {
    /// Not yet persisted server-side
    Placeholder(PlaceholderId),
    /// Known to the server
    Server(ConversationId),
}

impl ConversationRef {
    /// Start a brand-new local conversation
    #[must_use]
    pub fn placeholder() -> Self {
        Self::Placeholder(PlaceholderId::new())
    }

    /// Server id, if this reference has one
    #[must_use]
    pub fn server_id(&self) -> Option<&ConversationId> {
        match self {
            Self::Server(id) => Some(id),
            Self::Placeholder(_) => None,
        }
    }
}

impl From<ConversationId> for ConversationRef {
    fn from(id: ConversationId) -> Self {
        Self::Server(id)
    }
}

impl fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Placeholder(id) => write!(f, "{id}"),
            Self::Server(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_ids_are_unique() {
        let a = PlaceholderId::new();
        let b = PlaceholderId::new();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("local-"));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = CorrelationId::from("req-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"req-42\"");

        let back: CorrelationId = serde_json::from_str("\"req-42\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_conversation_ref_server_id() {
        let server = ConversationRef::from(ConversationId::from("c-1"));
        assert_eq!(server.server_id().map(ConversationId::as_str), Some("c-1"));
        assert!(ConversationRef::placeholder().server_id().is_none());
    }
}
