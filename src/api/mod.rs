pub mod archive;
pub mod outcome;
pub mod sequencer;
pub mod session;
pub mod traits;

pub use archive::{JsonlArchive, MemoryArchive, NoOpArchive, SessionArchive};
pub use outcome::{SelfTestReport, SweepOutcome, TestField, TestOutcome, TestStatus};
pub use sequencer::{Sequencer, SequencerBuilder, Stage};
pub use session::{FinalizedSession, SessionAggregator, TestSession};
pub use traits::{LoggingHook, SequencerHook};
