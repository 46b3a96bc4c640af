//! EchoNet - voice-activated text event router and session manager
//!
//! Ingests live microphone audio, transcribes speech, matches configured
//! wake phrases, and forwards transcripts to registered downstream targets
//! over HTTP, maintaining per-source conversational sessions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    HTTP Surface                       │
//! │  /register │ /state │ /text │ /audio │ /sessions     │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │                    ASR Worker                         │
//! │  Capture → VAD → Transcribe → Route → Target HTTP    │
//! └────────────────────┬─────────────────────────────────┘
//!                      │
//! ┌────────────────────▼─────────────────────────────────┐
//! │          Store │ Registry │ State │ Sessions          │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod config;
pub mod daemon;
pub mod db;
pub mod discovery;
pub mod error;
pub mod forwarder;
pub mod registry;
pub mod router;
pub mod state;
pub mod transcribe;
pub mod worker;

pub use config::Config;
pub use daemon::Daemon;
pub use db::{DbConn, DbPool, Setting, SettingChange, SettingsStore, Target};
pub use error::{Error, Result};
pub use forwarder::{ForwardOutcome, ForwardPayload, TargetForwarder};
pub use registry::{PhraseIndex, Registry};
pub use router::{DecisionMode, RouteDecision, Router, SessionManager, TextEvent};
pub use state::{ListenMode, StateManager};
pub use transcribe::{StubTranscriber, Transcriber, Transcription};
pub use worker::AsrWorker;
