// SPDX-License-Identifier: Apache-2.0 OR MIT
// Structured logging for the GMP router engine
//
// Every component logs through a `Logger` handle tagged with a `Facility`.
// Output goes to a pluggable `LogSink`: JSON lines on stderr for the daemon,
// an in-memory history for tests and introspection.

mod entry;
mod facility;
mod logger;
#[macro_use]
mod macros;
mod severity;

pub use entry::LogEntry;
pub use facility::Facility;
pub use logger::{LogRegistry, LogSink, Logger, MemorySink, StderrJsonSink};
pub use severity::Severity;
