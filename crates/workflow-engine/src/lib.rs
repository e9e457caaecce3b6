pub mod guard;
pub mod orchestrator;
pub mod signals;
pub mod suite;

pub use guard::MountGuard;
pub use orchestrator::{RunOrchestrator, RunState, RunSummary};
pub use signals::{install_interrupt_handlers, interrupted, last_signal};
pub use suite::{CommandSuite, TestOutcome, TestSuite};
