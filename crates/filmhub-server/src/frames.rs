//! Wire formats of the room socket.
//!
//! Inbound frames are JSON objects discriminated by `type`. Video-sync and
//! call-signal frames carry arbitrary extra fields that are relayed untouched,
//! so they are classified from a `serde_json::Value` instead of a closed enum.

use filmhub_types::{SignalAction, VideoAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    #[error("invalid `{kind}` frame: {source}")]
    InvalidField {
        kind: &'static str,
        source: serde_json::Error,
    },
    #[error("chat message is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Chat {
        message: String,
        /// Display name claimed by the client. Only used when the connection
        /// has no identity of its own.
        username: Option<String>,
    },
    VideoSync {
        action: VideoAction,
        /// The whole inbound object, relayed as-is.
        payload: Value,
    },
    CallSignal {
        action: SignalAction,
        target: Option<String>,
        username: Option<String>,
        /// The whole inbound object, relayed as-is.
        payload: Value,
    },
    Kick {
        username: String,
    },
}

#[derive(Deserialize)]
struct ChatBody {
    message: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct SignalBody {
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct KickBody {
    username: String,
}

fn body<'de, T: Deserialize<'de>>(kind: &'static str, value: &'de Value) -> Result<T, FrameError> {
    T::deserialize(value).map_err(|source| FrameError::InvalidField { kind, source })
}

impl InboundFrame {
    /// Classifies a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(FrameError::NotAnObject);
        }
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingType)?;

        if kind == "chat_message" {
            let ChatBody { message, username } = body("chat_message", &value)?;
            return Ok(Self::Chat { message, username });
        }
        if kind == "kick_user" {
            let KickBody { username } = body("kick_user", &value)?;
            return Ok(Self::Kick { username });
        }
        if let Some(action) = VideoAction::from_type(kind) {
            return Ok(Self::VideoSync {
                action,
                payload: value,
            });
        }
        if let Some(action) = SignalAction::from_type(kind) {
            let SignalBody { target, username } = body(action.as_str(), &value)?;
            return Ok(Self::CallSignal {
                action,
                target: target.filter(|t| !t.is_empty()),
                username,
                payload: value,
            });
        }

        Err(FrameError::UnknownType(kind.to_string()))
    }

    /// Rejects chat bodies above `max_chat_len` bytes.
    pub fn check_limits(&self, max_chat_len: usize) -> Result<(), FrameError> {
        match self {
            Self::Chat { message, .. } if message.len() > max_chat_len => Err(FrameError::TooLong {
                len: message.len(),
                max: max_chat_len,
            }),
            _ => Ok(()),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat_message",
            Self::VideoSync { action, .. } => action.as_str(),
            Self::CallSignal { action, .. } => action.as_str(),
            Self::Kick { .. } => "kick_user",
        }
    }
}

/// Outbound frames with a fixed shape.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage<'a> {
    ChatMessage {
        message: &'a str,
        username: &'a str,
        avatar: Option<&'a str>,
    },
    System {
        message: &'a str,
    },
    VideoEvent {
        action: VideoAction,
        data: &'a Value,
    },
    UserKicked {
        kicked_username: &'a str,
    },
}

/// Outbound call-signal frame. Its `type` is the signal action itself.
#[derive(Debug, Serialize)]
pub struct SignalFrame<'a> {
    #[serde(rename = "type")]
    pub action: SignalAction,
    pub sender: &'a str,
    pub data: &'a Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_frame_with_optional_username() {
        let frame = InboundFrame::parse(r#"{"type":"chat_message","message":"hi"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Chat {
                message: "hi".into(),
                username: None
            }
        );

        let frame =
            InboundFrame::parse(r#"{"type":"chat_message","message":"hi","username":"bob"}"#)
                .unwrap();
        assert!(matches!(frame, InboundFrame::Chat { username: Some(u), .. } if u == "bob"));
    }

    #[test]
    fn video_frames_keep_the_whole_payload() {
        let text = r#"{"type":"seek","time":42.5,"extra":{"nested":true}}"#;
        let InboundFrame::VideoSync { action, payload } = InboundFrame::parse(text).unwrap() else {
            panic!("expected video frame");
        };
        assert_eq!(action, VideoAction::Seek);
        assert_eq!(
            payload,
            json!({"type":"seek","time":42.5,"extra":{"nested":true}})
        );
    }

    #[test]
    fn signal_frames_extract_target_and_drop_empty_ones() {
        let frame = InboundFrame::parse(
            r#"{"type":"webrtc_offer","target":"bob","data":{"offer":{"sdp":"v=0"}}}"#,
        )
        .unwrap();
        let InboundFrame::CallSignal {
            action,
            target,
            payload,
            ..
        } = frame
        else {
            panic!("expected signal frame");
        };
        assert_eq!(action, SignalAction::Offer);
        assert_eq!(target.as_deref(), Some("bob"));
        assert_eq!(payload["data"]["offer"]["sdp"], "v=0");

        let frame = InboundFrame::parse(r#"{"type":"join_voice","target":""}"#).unwrap();
        assert!(matches!(frame, InboundFrame::CallSignal { target: None, .. }));
    }

    #[test]
    fn malformed_frames_are_classified_as_errors() {
        assert!(matches!(
            InboundFrame::parse("not json"),
            Err(FrameError::Json(_))
        ));
        assert!(matches!(
            InboundFrame::parse("[1,2]"),
            Err(FrameError::NotAnObject)
        ));
        assert!(matches!(
            InboundFrame::parse(r#"{"message":"x"}"#),
            Err(FrameError::MissingType)
        ));
        assert!(matches!(
            InboundFrame::parse(r#"{"type":"dance"}"#),
            Err(FrameError::UnknownType(t)) if t == "dance"
        ));
        assert!(matches!(
            InboundFrame::parse(r#"{"type":"kick_user"}"#),
            Err(FrameError::InvalidField { kind: "kick_user", .. })
        ));
        assert!(matches!(
            InboundFrame::parse(r#"{"type":"webrtc_answer","target":7}"#),
            Err(FrameError::InvalidField { .. })
        ));
    }

    #[test]
    fn chat_length_limit() {
        let frame = InboundFrame::Chat {
            message: "x".repeat(11),
            username: None,
        };
        assert!(frame.check_limits(11).is_ok());
        assert!(matches!(
            frame.check_limits(10),
            Err(FrameError::TooLong { len: 11, max: 10 })
        ));
    }

    #[test]
    fn outgoing_shapes() {
        let chat = serde_json::to_value(OutgoingMessage::ChatMessage {
            message: "hi",
            username: "bob",
            avatar: None,
        })
        .unwrap();
        assert_eq!(
            chat,
            json!({"type":"chat_message","message":"hi","username":"bob","avatar":null})
        );

        let data = json!({"type":"play","time":1});
        let video = serde_json::to_value(OutgoingMessage::VideoEvent {
            action: VideoAction::Play,
            data: &data,
        })
        .unwrap();
        assert_eq!(
            video,
            json!({"type":"video_event","action":"play","data":{"type":"play","time":1}})
        );

        let kicked =
            serde_json::to_value(OutgoingMessage::UserKicked { kicked_username: "bob" }).unwrap();
        assert_eq!(kicked, json!({"type":"user_kicked","kicked_username":"bob"}));

        let payload = json!({"type":"webrtc_ice_candidate","candidate":"c"});
        let signal = serde_json::to_value(SignalFrame {
            action: SignalAction::IceCandidate,
            sender: "alice",
            data: &payload,
        })
        .unwrap();
        assert_eq!(
            signal,
            json!({"type":"webrtc_ice_candidate","sender":"alice","data":payload})
        );
    }
}
