//! Run status events and the broadcast channel that carries them.
//!
//! A run emits a [`StatusEvent`] at every stage boundary. Subscribers (the
//! CLI's progress line, tests) listen on a `tokio::sync::broadcast` channel;
//! with no subscriber the events are dropped.

use serde::{Deserialize, Serialize};

/// One status event of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Event id of the run this belongs to.
    pub event_id: String,
    /// Monotonically increasing sequence number.
    pub seq: u64,
    pub kind: StatusKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StatusKind {
    StageStarted { stage: Stage },
    StageCompleted { stage: Stage, duration_ms: u64 },
    /// Counts known once mining finished.
    Mined {
        spine: usize,
        main: usize,
        statics: usize,
    },
    /// Non-fatal oddity worth surfacing.
    Warning { message: String },
    /// A run-ending failure the user must see.
    Alert { stage: Stage, message: String },
    Finished { file_name: String, entries: usize },
}

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Load,
    Acquire,
    Mine,
    Assemble,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load => write!(f, "Loading page"),
            Self::Acquire => write!(f, "Acquiring modules"),
            Self::Mine => write!(f, "Mining manifests"),
            Self::Assemble => write!(f, "Assembling archive"),
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StageStarted { stage } => write!(f, "{stage}..."),
            Self::StageCompleted { stage, duration_ms } => {
                write!(f, "{stage} done ({duration_ms}ms)")
            }
            Self::Mined {
                spine,
                main,
                statics,
            } => write!(f, "found {spine} spine, {main} main, {statics} static resources"),
            Self::Warning { message } => write!(f, "warning: {message}"),
            Self::Alert { stage, message } => write!(f, "{stage} failed: {message}"),
            Self::Finished { file_name, entries } => {
                write!(f, "{file_name} ready ({entries} entries)")
            }
        }
    }
}

pub type StatusSender = tokio::sync::broadcast::Sender<StatusEvent>;
pub type StatusReceiver = tokio::sync::broadcast::Receiver<StatusEvent>;

/// Create a status channel. 64 slots cover a run several times over.
pub fn channel() -> (StatusSender, StatusReceiver) {
    tokio::sync::broadcast::channel(64)
}

/// Emit an event, ignoring send errors (no receivers).
pub fn emit(tx: &Option<StatusSender>, event_id: &str, seq: &mut u64, kind: StatusKind) {
    if let Some(ref sender) = tx {
        *seq += 1;
        let _ = sender.send(StatusEvent {
            event_id: event_id.to_string(),
            seq: *seq,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_event_serialization() {
        let event = StatusEvent {
            event_id: "e1foo".to_string(),
            seq: 1,
            kind: StatusKind::StageStarted { stage: Stage::Mine },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("StageStarted"));
        assert!(json.contains("Mine"));

        let back: StatusEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, event.kind);
    }

    #[test]
    fn test_emit_without_sender_is_noop() {
        let mut seq = 0;
        emit(&None, "e1", &mut seq, StatusKind::StageStarted { stage: Stage::Load });
        assert_eq!(seq, 0);
    }

    #[tokio::test]
    async fn test_emit_sequences_events() {
        let (tx, mut rx) = channel();
        let tx = Some(tx);
        let mut seq = 0;
        emit(&tx, "e1", &mut seq, StatusKind::StageStarted { stage: Stage::Load });
        emit(
            &tx,
            "e1",
            &mut seq,
            StatusKind::StageCompleted {
                stage: Stage::Load,
                duration_ms: 3,
            },
        );
        assert_eq!(rx.recv().await.unwrap().seq, 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.seq, 2);
        assert_eq!(second.kind.to_string(), "Loading page done (3ms)");
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Assemble.to_string(), "Assembling archive");
    }
}
