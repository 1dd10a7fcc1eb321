use serde::{Deserialize, Serialize};

/// Inbound telephony frames, keyed by `interaction_type`.
///
/// The platform also sends informational frames (incremental transcript
/// updates and the like) that require no reply — those land on the
/// catch-all variant and are ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "interaction_type")]
#[serde(rename_all = "snake_case")]
pub enum InboundEvent {
    CallDetails {
        call: CallDetails,
    },
    PingPong {
        timestamp: u64,
    },
    ResponseRequired {
        response_id: u64,
        #[serde(default)]
        transcript: Vec<TranscriptEntry>,
    },
    ReminderRequired {
        response_id: u64,
        #[serde(default)]
        transcript: Vec<TranscriptEntry>,
    },
    #[serde(other)]
    Informational,
}

#[derive(Debug, Deserialize)]
pub struct CallDetails {
    #[serde(default)]
    pub from_number: Option<String>,
    #[serde(default)]
    pub to_number: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
}

impl CallDetails {
    /// The number to authorize against. Inbound calls are judged by who is
    /// calling; outbound calls by who was dialed.
    pub fn relevant_number(&self) -> Option<&str> {
        if self.direction.as_deref() == Some("outbound") {
            self.to_number.as_deref()
        } else {
            self.from_number.as_deref()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

/// Outbound frames, keyed by `response_type`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "response_type")]
#[serde(rename_all = "snake_case")]
pub enum OutboundFrame {
    Config { config: ConfigPayload },
    Response {
        response_id: u64,
        content: String,
        content_complete: bool,
        end_call: bool,
    },
    PingPong { timestamp: u64 },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfigPayload {
    pub auto_reconnect: bool,
    pub call_details: bool,
}

impl OutboundFrame {
    /// The capability handshake the bridge must send before any content
    /// exchange: request call-detail metadata, declare reconnect support.
    pub fn handshake() -> Self {
        OutboundFrame::Config {
            config: ConfigPayload {
                auto_reconnect: true,
                call_details: true,
            },
        }
    }

    pub fn response(response_id: u64, content: impl Into<String>, end_call: bool) -> Self {
        OutboundFrame::Response {
            response_id,
            content: content.into(),
            content_complete: true,
            end_call,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_details() {
        let raw = r#"{
            "interaction_type": "call_details",
            "call": {
                "from_number": "+15551234567",
                "to_number": "+15557654321",
                "direction": "inbound"
            }
        }"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        match event {
            InboundEvent::CallDetails { call } => {
                assert_eq!(call.relevant_number(), Some("+15551234567"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn outbound_direction_selects_dialed_number() {
        let call = CallDetails {
            from_number: Some("+15550000000".into()),
            to_number: Some("+15551111111".into()),
            direction: Some("outbound".into()),
        };
        assert_eq!(call.relevant_number(), Some("+15551111111"));
    }

    #[test]
    fn missing_direction_defaults_to_inbound() {
        let call = CallDetails {
            from_number: Some("+15550000000".into()),
            to_number: Some("+15551111111".into()),
            direction: None,
        };
        assert_eq!(call.relevant_number(), Some("+15550000000"));
    }

    #[test]
    fn parses_response_required() {
        let raw = r#"{
            "interaction_type": "response_required",
            "response_id": 3,
            "transcript": [
                {"role": "agent", "content": "Hello"},
                {"role": "user", "content": "Hi there"}
            ]
        }"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        match event {
            InboundEvent::ResponseRequired {
                response_id,
                transcript,
            } => {
                assert_eq!(response_id, 3);
                assert_eq!(transcript.len(), 2);
                assert_eq!(transcript[1].role, Role::User);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_interaction_type_is_informational() {
        let raw = r#"{"interaction_type": "update_only", "transcript": []}"#;
        let event: InboundEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, InboundEvent::Informational));
    }

    #[test]
    fn handshake_serializes_with_config_tag() {
        let json = serde_json::to_value(OutboundFrame::handshake()).unwrap();
        assert_eq!(json["response_type"], "config");
        assert_eq!(json["config"]["auto_reconnect"], true);
        assert_eq!(json["config"]["call_details"], true);
    }

    #[test]
    fn response_frame_shape() {
        let json =
            serde_json::to_value(OutboundFrame::response(7, "Hello.", false)).unwrap();
        assert_eq!(json["response_type"], "response");
        assert_eq!(json["response_id"], 7);
        assert_eq!(json["content"], "Hello.");
        assert_eq!(json["content_complete"], true);
        assert_eq!(json["end_call"], false);
    }
}
