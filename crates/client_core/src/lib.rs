//! Client side of the task console: live task streams, the task view they
//! feed, and the REST catalog used to create and look up tasks.

pub mod catalog;
pub mod console;
pub mod coordinator;
pub mod render;
pub mod session;
pub mod transport;
pub mod view;

pub use catalog::{hydrate_view, HttpTaskCatalog, TaskCatalog};
pub use console::{Selection, TaskConsole};
pub use coordinator::{ReconnectPolicy, SessionCoordinator};
pub use render::{ConsoleNotice, RenderSink};
pub use session::{ConnectionState, SessionHandle, SessionId, SessionListener, SessionSignal};
pub use transport::{StreamConnector, TransportError, WsStreamConnector};
pub use view::{reduce, SequenceAnomaly, StepRecord, TaskView};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
