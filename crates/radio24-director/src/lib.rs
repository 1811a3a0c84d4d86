//! Program director for radio24: rotates themes and segments, composes the
//! host prompt and announces program changes to listeners.

pub mod director;
pub mod prompt;
pub mod schedule;
pub mod server;
pub mod sink;

pub use director::Director;
pub use schedule::Schedule;
pub use server::{DirectorState, router, start_director};
pub use sink::{HttpProgramSink, ProgramSink};
