use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

use flume::{Receiver, Sender};

use crate::{
    api::{
        outcome::{SweepOutcome, TestField, TestOutcome},
        sequencer::Stage,
        session::FinalizedSession,
        traits::SequencerHook,
    },
    core::logs::LogEntry,
};

/// Messages sent from UI thread to core worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiToCore {
    /// Stop before the next stage. The session is still archived.
    Stop,
}

/// Messages sent from core worker thread back to UI thread.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreToUi {
    Progress(LogEntry),
    StageStarted {
        stage: Stage,
    },
    CheckFinished {
        field: TestField,
        outcome: TestOutcome,
    },
    SweepFinished {
        stage: Stage,
        outcome: SweepOutcome,
    },
    /// The run was aborted; contains the fault description.
    Fault {
        reason: String,
    },
    Finished(Box<FinalizedSession>),
}

/// Simple holder passed into UI loop containing the receiving side from core and the sending side to core.
#[derive(Debug, Clone)]
pub struct Bus {
    pub core_rx: Receiver<CoreToUi>,
    pub ui_tx: Sender<UiToCore>,
}

impl Bus {
    pub fn new(core_rx: Receiver<CoreToUi>, ui_tx: Sender<UiToCore>) -> Self {
        Self { core_rx, ui_tx }
    }

    /// Create both ends: the UI keeps the [`Bus`], the worker registers the
    /// [`BusHook`] with its sequencer.
    pub fn pair() -> (Bus, BusHook) {
        let (core_tx, core_rx) = flume::unbounded();
        let (ui_tx, ui_rx) = flume::unbounded();
        (Bus::new(core_rx, ui_tx), BusHook::new(core_tx, ui_rx))
    }
}

/// Worker side of the bus, forwarding sequencer events to the UI.
pub struct BusHook {
    core_tx: Sender<CoreToUi>,
    ui_rx: Receiver<UiToCore>,
    stop_requested: AtomicBool,
}

impl BusHook {
    pub fn new(core_tx: Sender<CoreToUi>, ui_rx: Receiver<UiToCore>) -> Self {
        Self {
            core_tx,
            ui_rx,
            stop_requested: AtomicBool::new(false),
        }
    }

    fn send(&self, msg: CoreToUi) {
        // A vanished UI must not stop the run.
        if self.core_tx.send(msg).is_err() {
            log::debug!("UI receiver dropped, event discarded");
        }
    }
}

impl SequencerHook for BusHook {
    fn on_stage(&self, stage: Stage) {
        self.send(CoreToUi::StageStarted { stage });
    }

    fn on_check(&self, field: TestField, outcome: &TestOutcome) {
        self.send(CoreToUi::CheckFinished {
            field,
            outcome: outcome.clone(),
        });
    }

    fn on_sweep(&self, stage: Stage, outcome: &SweepOutcome) {
        self.send(CoreToUi::SweepFinished {
            stage,
            outcome: outcome.clone(),
        });
    }

    fn on_progress(&self, entry: &LogEntry) {
        self.send(CoreToUi::Progress(entry.clone()));
    }

    fn on_fault(&self, reason: &str) {
        self.send(CoreToUi::Fault {
            reason: reason.to_string(),
        });
    }

    fn on_finished(&self, session: &FinalizedSession) {
        self.send(CoreToUi::Finished(Box::new(session.clone())));
    }

    fn should_continue(&self) -> bool {
        for msg in self.ui_rx.try_iter() {
            match msg {
                UiToCore::Stop => {
                    log::info!("Stop requested");
                    self.stop_requested.store(true, Ordering::Release);
                }
            }
        }
        !self.stop_requested.load(Ordering::Acquire)
    }
}
