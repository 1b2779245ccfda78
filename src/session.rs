//! # Session — Planning/Execution Handoff
//!
//! Runs one case on a dedicated worker thread so an interactive caller can
//! show the plan, wait for a go/no-go, and watch steps arrive.
//!
//! ```text
//! caller                         worker
//!   spawn ───────────────────────▶ run_qc_stage
//!   ◀──────────── QcReady ─────────┘
//!   confirm()/abort() ──oneshot──▶ run_pipeline (or stop)
//!   ◀──────────── Step × n ────────┘
//!   ◀──────────── Finished / Failed
//!   join()
//! ```
//!
//! The confirmation is a one-shot channel: dropping the session without
//! confirming counts as an abort. Cancellation after confirmation goes
//! through the orchestrator's [`CancelFlag`] and takes effect between steps.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::facts::QualityFacts;
use crate::orchestrator::{CancelFlag, Orchestrator, PipelineOutcome};
use crate::policy::Decision;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    QcReady {
        facts: QualityFacts,
        decision: Decision,
    },
    Step {
        step_type: String,
        output: PathBuf,
    },
    Finished(Box<PipelineOutcome>),
    /// Confirmation refused or never given.
    Aborted,
    Failed(String),
}

pub struct CaseSession {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    confirm: Option<oneshot::Sender<bool>>,
    cancel: CancelFlag,
    handle: Option<JoinHandle<Result<Option<PipelineOutcome>>>>,
}

impl CaseSession {
    pub fn spawn(mut orchestrator: Orchestrator, image: PathBuf) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (confirm_tx, confirm_rx) = oneshot::channel::<bool>();
        let cancel = orchestrator.cancel_flag();

        let handle = std::thread::spawn(move || {
            let qc = match orchestrator.run_qc_stage(&image) {
                Ok(qc) => qc,
                Err(e) => {
                    let _ = tx.send(SessionEvent::Failed(format!("{e:#}")));
                    return Err(e);
                }
            };
            let _ = tx.send(SessionEvent::QcReady {
                facts: qc.facts,
                decision: qc.decision,
            });

            if !confirm_rx.blocking_recv().unwrap_or(false) {
                info!(case_id = orchestrator.case_id(), "execution not confirmed");
                let _ = tx.send(SessionEvent::Aborted);
                return Ok(None);
            }

            let step_tx = tx.clone();
            let result = orchestrator.run_pipeline(&image, &mut |step_type, output| {
                let _ = step_tx.send(SessionEvent::Step {
                    step_type: step_type.to_string(),
                    output: output.to_path_buf(),
                });
            });
            match result {
                Ok(outcome) => {
                    let _ = tx.send(SessionEvent::Finished(Box::new(outcome.clone())));
                    Ok(Some(outcome))
                }
                Err(e) => {
                    let _ = tx.send(SessionEvent::Failed(format!("{e:#}")));
                    Err(e)
                }
            }
        });

        CaseSession {
            events: rx,
            confirm: Some(confirm_tx),
            cancel,
            handle: Some(handle),
        }
    }

    /// Block for the next event. `None` once the worker is gone.
    pub fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.blocking_recv()
    }

    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Let the worker execute the plan. No-op after the first confirm/abort.
    pub fn confirm(&mut self) {
        if let Some(tx) = self.confirm.take() {
            let _ = tx.send(true);
        }
    }

    /// Refuse execution. Also cancels a run that is already executing.
    pub fn abort(&mut self) {
        if let Some(tx) = self.confirm.take() {
            let _ = tx.send(false);
        }
        self.cancel.cancel();
    }

    /// Stop between steps.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker. `Ok(None)` when execution was not confirmed.
    pub fn join(mut self) -> Result<Option<PipelineOutcome>> {
        // An unconfirmed session must not leave the worker waiting.
        self.confirm.take();
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("session already joined"))?;
        handle.join().map_err(|_| {
            warn!("case worker panicked");
            anyhow!("case worker panicked")
        })?
    }
}
