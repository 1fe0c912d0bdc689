use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::SessionView;
use crate::error::SessionError;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest payload a single frame may announce.
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum FrameError {
    /// More bytes are needed before the frame can be read.
    #[error("incomplete frame")]
    Incomplete,

    #[error("frame of {0} bytes exceeds the size limit")]
    TooLarge(usize),

    /// The frame was complete but its payload is not a valid message.
    /// `consumed` bytes can be skipped to reach the next frame.
    #[error("invalid message: {source}")]
    Invalid {
        consumed: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Messages sent from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    Play { station_id: String },
    PlayStream { uri: String },
    Stop,
    Next,
    Prev,
    /// Voice/text search; an empty query replays the last station.
    Search { query: String },
    StartSleepTimer,
    CancelSleepTimer,
    GetProgress,
    GetState,
}

/// Messages sent from the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect.
    Hello {
        protocol_version: u32,
        state: SessionView,
    },
    State {
        data: SessionView,
    },
    Progress {
        metadata_history: Vec<String>,
        sleep_remaining_secs: Option<u64>,
    },
    SleepTimer {
        remaining_secs: u64,
    },
    Error {
        kind: String,
        message: String,
        /// Fatal errors stay on screen until dismissed.
        persistent: bool,
    },
    Log {
        message: String,
    },
}

impl Broadcast {
    pub fn error(err: &SessionError) -> Self {
        Broadcast::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
            persistent: err.is_fatal(),
        }
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Read one frame from the front of `data`.  Returns the message and
    /// the number of bytes it took.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), FrameError> {
        if data.len() < 4 {
            return Err(FrameError::Incomplete);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        if data.len() < 4 + len {
            return Err(FrameError::Incomplete);
        }
        match serde_json::from_slice(&data[4..4 + len]) {
            Ok(msg) => Ok((msg, 4 + len)),
            Err(source) => Err(FrameError::Invalid {
                consumed: 4 + len,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::PlaybackStatus;

    #[test]
    fn test_command_frame() {
        let msg = Message::Command(Command::Play {
            station_id: "nts-1".into(),
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Play { station_id }) => assert_eq!(station_id, "nts-1"),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_partial_frame() {
        let encoded = Message::Command(Command::Stop).encode().unwrap();
        assert!(matches!(
            Message::decode(&encoded[..2]),
            Err(FrameError::Incomplete)
        ));
        assert!(matches!(
            Message::decode(&encoded[..encoded.len() - 1]),
            Err(FrameError::Incomplete)
        ));
    }

    #[test]
    fn test_invalid_frame_can_be_skipped() {
        let junk = br#"{"cmd":"Rewind"}"#;
        let mut data = (junk.len() as u32).to_be_bytes().to_vec();
        data.extend_from_slice(junk);
        data.extend(Message::Command(Command::Stop).encode().unwrap());

        let consumed = match Message::decode(&data) {
            Err(FrameError::Invalid { consumed, .. }) => consumed,
            other => panic!("expected invalid frame, got {:?}", other),
        };
        assert_eq!(consumed, 4 + junk.len());

        match Message::decode(&data[consumed..]) {
            Ok((Message::Command(Command::Stop), _)) => {}
            other => panic!("expected stop, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_frame_is_rejected_from_header() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        assert!(matches!(
            Message::decode(&header),
            Err(FrameError::TooLarge(n)) if n == MAX_FRAME_LEN + 1
        ));
    }

    #[test]
    fn test_hello_carries_state() {
        let state = SessionView {
            status: PlaybackStatus::Playing,
            metadata: "Artist - Title".into(),
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(state.status, PlaybackStatus::Playing);
                assert_eq!(state.metadata, "Artist - Title");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_error_broadcast_marks_fatal() {
        match Broadcast::error(&SessionError::RestartExhausted { attempts: 5 }) {
            Broadcast::Error {
                kind, persistent, ..
            } => {
                assert_eq!(kind, "restart_exhausted");
                assert!(persistent);
            }
            _ => panic!("Wrong message type"),
        }
    }
}
