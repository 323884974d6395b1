/// Sequencer hooks - observers for a bench run
///
/// The sequencer calls every registered hook as the run progresses. Hooks
/// never influence verdicts; they only observe, except for
/// `should_continue`, which lets a front end request a stop between stages.
///
/// The CLI provides a flume-backed implementation in `core::bus`.
use crate::{
    api::{
        outcome::{SweepOutcome, TestField, TestOutcome},
        sequencer::Stage,
        session::FinalizedSession,
    },
    core::logs::LogEntry,
};

pub trait SequencerHook: Send + Sync {
    /// A stage is about to run.
    fn on_stage(&self, _stage: Stage) {}

    /// A verdict was recorded for one session slot.
    fn on_check(&self, _field: TestField, _outcome: &TestOutcome) {}

    /// A duty-cycle sweep finished.
    fn on_sweep(&self, _stage: Stage, _outcome: &SweepOutcome) {}

    /// Operator-facing progress message.
    fn on_progress(&self, _entry: &LogEntry) {}

    /// The run was aborted by a transport fault.
    fn on_fault(&self, _reason: &str) {}

    /// The session was finalized.
    fn on_finished(&self, _session: &FinalizedSession) {}

    /// Return false to stop the run before the next stage.
    fn should_continue(&self) -> bool {
        true
    }
}

/// Hook that mirrors every event to the `log` facade
pub struct LoggingHook;

impl SequencerHook for LoggingHook {
    fn on_stage(&self, stage: Stage) {
        log::info!("== {stage} ==");
    }

    fn on_check(&self, field: TestField, outcome: &TestOutcome) {
        let status = if outcome.passed { "OK" } else { "NG" };
        log::info!("{field}: {status} ({})", outcome.message);
    }

    fn on_sweep(&self, stage: Stage, outcome: &SweepOutcome) {
        log::info!("{stage} sweep: {outcome:?}");
    }

    fn on_fault(&self, reason: &str) {
        log::error!("Run aborted: {reason}");
    }

    fn on_finished(&self, done: &FinalizedSession) {
        log::info!(
            "Session {} verdict {} (archived: {})",
            done.session.id,
            done.session.verdict,
            done.archived
        );
    }
}
