//! powerqa: serial-driven validation bench for JT2302 power boards
//!
//! The library drives a board through its power checks, the PWM duty-cycle
//! sweeps and the firmware communication checks over a serial link, and
//! collects the verdicts into an archived session. The `powerqa` binary is
//! a thin command-line front end over [`Sequencer`].
//!
//! Everything that waits goes through [`core::clock::Clock`] and everything
//! that talks to the board goes through [`protocol::Transport`], so a run can
//! be replayed against a scripted transport in virtual time.

pub mod api;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;

pub use api::*;
