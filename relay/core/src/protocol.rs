//! Push Channel Protocol
//!
//! Frames exchanged over the duplex channel. Inbound frames are pushed by
//! the server; outbound frames are requests the client emits.
//!
//! # Wire Format
//!
//! Every frame is a JSON object. Inbound frames are discriminated by a
//! `type` field, outbound frames by an `action` field. Field names are
//! camelCase on the wire.
//!
//! ```text
//! ← {"type":"welcome","tenantId":"acme"}
//! → {"action":"join","conversationId":"c-1"}
//! ← {"type":"joined","conversationId":"c-1"}
//! ← {"type":"chunk","requestCorrelationId":"r-9","conversationId":"c-1","sequenceId":0,"content":"Hi"}
//! ← {"type":"end","requestCorrelationId":"r-9","conversationId":"c-1","content":"Hi there!"}
//! ```
//!
//! Chunk content is cumulative: each chunk carries the whole answer so far,
//! not a delta.

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, CorrelationId, TenantId};

/// A follow-up the assistant proposes once an answer is complete
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedAction {
    /// Text shown to the user
    pub label: String,
    /// Prompt to submit when the action is picked (defaults to the label)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Frames pushed by the server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InboundFrame {
    /// Handshake confirmation for a `hello`
    Welcome {
        /// Tenant the server bound this connection to
        tenant_id: TenantId,
    },

    /// Room join acknowledgement
    Joined {
        /// Conversation whose room was joined
        conversation_id: ConversationId,
    },

    /// Cumulative content snapshot
    Chunk {
        /// Correlation id of the originating submission
        request_correlation_id: CorrelationId,
        /// Conversation the answer belongs to
        conversation_id: ConversationId,
        /// Monotonic per-request sequence number
        sequence_id: i64,
        /// Whole answer so far
        content: String,
        /// Server hint that no further content chunks follow
        #[serde(default)]
        is_final: bool,
    },

    /// The assistant started using an auxiliary capability
    ToolCall {
        /// Correlation id of the originating submission
        request_correlation_id: CorrelationId,
        /// Conversation the answer belongs to
        conversation_id: ConversationId,
        /// Sequence number, when the server numbers tool events
        #[serde(default)]
        sequence_id: Option<i64>,
        /// Capability name
        #[serde(default)]
        tool_name: Option<String>,
        /// Free-form detail for display
        #[serde(default)]
        content: Option<String>,
    },

    /// An auxiliary capability returned
    ToolResult {
        /// Correlation id of the originating submission
        request_correlation_id: CorrelationId,
        /// Conversation the answer belongs to
        conversation_id: ConversationId,
        /// Sequence number, when the server numbers tool events
        #[serde(default)]
        sequence_id: Option<i64>,
        /// Capability name
        #[serde(default)]
        tool_name: Option<String>,
        /// Free-form detail for display
        #[serde(default)]
        content: Option<String>,
    },

    /// Stream finished; content is the definitive answer
    End {
        /// Correlation id of the originating submission
        request_correlation_id: CorrelationId,
        /// Conversation the answer belongs to
        conversation_id: ConversationId,
        /// Final answer (replaces the streamed snapshot when present)
        #[serde(default)]
        content: Option<String>,
        /// Follow-up suggestions
        #[serde(default)]
        suggested_actions: Option<Vec<SuggestedAction>>,
    },

    /// Server-side failure for this request
    Error {
        /// Correlation id of the originating submission
        request_correlation_id: CorrelationId,
        /// Conversation the answer belongs to
        conversation_id: ConversationId,
        /// Failure description
        message: String,
    },
}

impl InboundFrame {
    /// Split a stream frame into its routing envelope
    ///
    /// Returns `None` for connection-level frames (`welcome`, `joined`).
    #[must_use]
    pub fn into_push_event(self) -> Option<PushEvent> {
        let (correlation_id, conversation_id, kind) = match self {
            Self::Welcome { .. } | Self::Joined { .. } => return None,
            Self::Chunk {
                request_correlation_id,
                conversation_id,
                sequence_id,
                content,
                is_final,
            } => (
                request_correlation_id,
                conversation_id,
                PushKind::Chunk {
                    sequence: sequence_id,
                    content,
                    is_final,
                },
            ),
            Self::ToolCall {
                request_correlation_id,
                conversation_id,
                sequence_id,
                tool_name,
                content,
            } => (
                request_correlation_id,
                conversation_id,
                PushKind::Tool {
                    phase: ToolPhase::Call,
                    sequence: sequence_id,
                    tool_name,
                    detail: content,
                },
            ),
            Self::ToolResult {
                request_correlation_id,
                conversation_id,
                sequence_id,
                tool_name,
                content,
            } => (
                request_correlation_id,
                conversation_id,
                PushKind::Tool {
                    phase: ToolPhase::Result,
                    sequence: sequence_id,
                    tool_name,
                    detail: content,
                },
            ),
            Self::End {
                request_correlation_id,
                conversation_id,
                content,
                suggested_actions,
            } => (
                request_correlation_id,
                conversation_id,
                PushKind::End {
                    content,
                    suggested_actions: suggested_actions.unwrap_or_default(),
                },
            ),
            Self::Error {
                request_correlation_id,
                conversation_id,
                message,
            } => (
                request_correlation_id,
                conversation_id,
                PushKind::Error { message },
            ),
        };

        Some(PushEvent {
            correlation_id,
            conversation_id,
            kind,
        })
    }
}

/// Requests emitted by the client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundFrame {
    /// Handshake opening a tenant-scoped connection
    Hello {
        /// Tenant scope
        tenant_id: TenantId,
    },

    /// Register for push events of one conversation
    Join {
        /// Conversation room to join
        conversation_id: ConversationId,
    },

    /// Best-effort request to stop generating an answer
    Cancel {
        /// Conversation the request belongs to
        conversation_id: ConversationId,
        /// Correlation id of the request being cancelled
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_correlation_id: Option<CorrelationId>,
        /// Why the caller cancelled
        reason: String,
    },
}

/// Which side of a tool invocation an event reports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolPhase {
    /// Capability invoked
    Call,
    /// Capability returned
    Result,
}

/// Stream event payload, routed by correlation id
#[derive(Clone, Debug, PartialEq)]
pub enum PushKind {
    /// Cumulative content snapshot
    Chunk {
        /// Monotonic sequence number
        sequence: i64,
        /// Whole answer so far
        content: String,
        /// Server marked this as the last content chunk
        is_final: bool,
    },
    /// Tool activity (no new content)
    Tool {
        /// Call or result
        phase: ToolPhase,
        /// Optional sequence number
        sequence: Option<i64>,
        /// Capability name
        tool_name: Option<String>,
        /// Free-form detail
        detail: Option<String>,
    },
    /// Definitive answer
    End {
        /// Replaces the streamed snapshot when present
        content: Option<String>,
        /// Follow-up suggestions
        suggested_actions: Vec<SuggestedAction>,
    },
    /// Server-reported failure
    Error {
        /// Failure description
        message: String,
    },
}

impl PushKind {
    /// Short name used in logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Tool {
                phase: ToolPhase::Call,
                ..
            } => "tool_call",
            Self::Tool {
                phase: ToolPhase::Result,
                ..
            } => "tool_result",
            Self::End { .. } => "end",
            Self::Error { .. } => "error",
        }
    }
}

/// A stream frame with its routing keys pulled out
#[derive(Clone, Debug, PartialEq)]
pub struct PushEvent {
    /// Session key
    pub correlation_id: CorrelationId,
    /// Conversation the answer belongs to
    pub conversation_id: ConversationId,
    /// Payload
    pub kind: PushKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chunk_wire_format() {
        let json = r#"{"type":"chunk","requestCorrelationId":"r-1","conversationId":"c-1","sequenceId":3,"content":"Hi there"}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();

        assert_eq!(
            frame,
            InboundFrame::Chunk {
                request_correlation_id: "r-1".into(),
                conversation_id: "c-1".into(),
                sequence_id: 3,
                content: "Hi there".to_string(),
                is_final: false,
            }
        );
    }

    #[test]
    fn test_end_with_null_actions() {
        let json = r#"{"type":"end","requestCorrelationId":"r-1","conversationId":"c-1","content":"done","suggestedActions":null}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        let event = frame.into_push_event().unwrap();

        assert_eq!(
            event.kind,
            PushKind::End {
                content: Some("done".to_string()),
                suggested_actions: Vec::new(),
            }
        );
    }

    #[test]
    fn test_tool_call_without_sequence() {
        let json = r#"{"type":"tool_call","requestCorrelationId":"r-1","conversationId":"c-1","toolName":"portfolio_lookup"}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        let event = frame.into_push_event().unwrap();

        assert_eq!(event.kind.name(), "tool_call");
        assert!(matches!(
            event.kind,
            PushKind::Tool {
                phase: ToolPhase::Call,
                sequence: None,
                ..
            }
        ));
    }

    #[test]
    fn test_control_frames_are_not_push_events() {
        let welcome = InboundFrame::Welcome {
            tenant_id: "acme".into(),
        };
        assert!(welcome.into_push_event().is_none());

        let joined: InboundFrame =
            serde_json::from_str(r#"{"type":"joined","conversationId":"c-1"}"#).unwrap();
        assert!(joined.into_push_event().is_none());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<InboundFrame, _> =
            serde_json::from_str(r#"{"type":"progress","requestCorrelationId":"r-1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_outbound_cancel_wire_format() {
        let frame = OutboundFrame::Cancel {
            conversation_id: "c-1".into(),
            request_correlation_id: Some("r-1".into()),
            reason: "user".to_string(),
        };
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "action": "cancel",
                "conversationId": "c-1",
                "requestCorrelationId": "r-1",
                "reason": "user",
            })
        );
    }

    #[test]
    fn test_outbound_join_omits_nothing() {
        let frame = OutboundFrame::Join {
            conversation_id: "c-7".into(),
        };
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"action":"join","conversationId":"c-7"}"#
        );
    }
}
