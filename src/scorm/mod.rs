//! SCORM runtime bridge
//!
//! Embedded packages run in an isolated frame and reach the host only through
//! the runtime API. The layers, bottom up:
//!
//! - `cmi`: data model vocabulary, status values, time formats, error codes
//! - `session`: the typed per-frame state machine
//! - `wire`: string encoding of the `LMS*` and 2004 API calls
//! - `registry`: live sessions keyed by id, backed by the progress database

pub mod cmi;
pub mod registry;
pub mod session;
pub mod wire;

pub use cmi::{BridgeError, LessonStatus, ScormVersion};
pub use registry::{spawn_sweeper, CallReply, OpenOutcome, ServiceRuntimeStore, SessionInfo, SessionRegistry};
pub use session::{CommitData, RuntimeStore, ScormSession, SessionState};
