/// UI-independent plumbing shared by the library and the CLI:
/// - Message bus between the worker thread and the front end
/// - Time source used by every wait
/// - Operator-facing log entries
/// - Last-port persistence
/// - Bench constants (calibration, timings, sweep tuning)
pub mod bus;
pub mod clock;
pub mod logs;
pub mod persistence;
pub mod settings;

// Re-export commonly used types
pub use bus::{Bus, BusHook, CoreToUi, UiToCore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use settings::{Calibration, SweepTuning, Timings};
