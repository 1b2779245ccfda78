//! # faceguard — Identity-Safe Forensic Face Enhancement
//!
//! Plans, executes and guards enhancement of face images ahead of identity
//! matching, and learns from finished cases which actions to prefer.
//!
//! ## Closed Loop
//!
//! ```text
//! image ─▶ facts ─▶ policy ─▶ plan ─▶ orchestrator ⇄ guard ─▶ final image
//!                     ▲                    │
//!                     │                    ▼ events
//!              learned policy ◀─ builder ◀─ storage ◀─ recorder / parser
//! ```
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`facts`] | Raw provider measurements to normalized 0–1 scores |
//! | [`policy`] | Forensic and enhancement rule sets, learned-policy post-filter |
//! | [`orchestrator`] | Step-by-step execution against pluggable operators |
//! | [`guard`] | Per-case identity baseline; accept or reject each step |
//! | [`session`] | Worker thread with a go/no-go handoff between plan and run |
//! | [`events`] | Pipeline event bus |
//! | [`audit`] | Text case log rendered from events |
//! | [`recorder`] | Structured case record built from events |
//! | [`learner`] | Log parser, case storage, statistics, policy builder and cadence |
//! | [`external`] | Subprocess-backed collaborators |
//! | [`config`] | `faceguard.toml` |
//! | [`context`] | Application wiring |
//! | [`prom_metrics`] | Prometheus counters |
//! | [`persist`] | Atomic JSON writes and digests |

pub mod audit;
pub mod config;
pub mod context;
pub mod events;
pub mod external;
pub mod facts;
pub mod guard;
pub mod learner;
pub mod orchestrator;
pub mod persist;
pub mod policy;
pub mod prom_metrics;
pub mod recorder;
pub mod session;

pub use config::Config;
pub use context::{AppContext, Collaborators};
pub use facts::{QualityFacts, QualityFactsProvider, RawAssessment, ScoreBuilder};
pub use guard::{RecognitionEvaluator, RecognitionReport, SafetyGuard};
pub use orchestrator::{Operator, OperatorRegistry, Orchestrator};
pub use policy::{Action, ActionKind, Decision, PolicyEngine, Profile};
