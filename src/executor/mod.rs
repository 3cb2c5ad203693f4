//! External command execution.
//!
//! Every pipeline stage other than rename and reload is an external program.
//! A [`CommandSpec`] describes one invocation, a [`CommandRunner`] executes
//! it and reduces the result to an [`ExitOutcome`].

mod mock;
mod process;
mod spec;

pub use mock::{MockCommandRunner, RecordedCommand};
pub use process::ProcessRunner;
pub use spec::{CommandRunner, CommandSpec, DEFAULT_TIMEOUT, ExitOutcome};
