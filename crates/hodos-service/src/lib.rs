//! Lifecycle of the single hodos background service.
//!
//! Client invocations and the service are separate OS processes. They share
//! no memory; coordination happens through two files in the state directory
//! (the pid marker and the session reference count) and process signals.
//!
//! - [`ProcessRegistry`]: marker and reference-count files, liveness checks.
//! - [`ServiceSupervisor`]: start (detached), wait, stop, restart.
//! - [`StartupDescriptor`]: typed settings handed to the spawned service
//!   through its environment.
//! - [`ServiceSession`]: reference-count guard held by a client session.

pub mod descriptor;
pub mod error;
pub mod registry;
pub mod session;
pub mod supervisor;

pub use descriptor::StartupDescriptor;
pub use error::ServiceError;
pub use registry::{process_alive, MarkerGuard, ProcessRegistry};
pub use session::ServiceSession;
pub use supervisor::{
    EnsureOutcome, LaunchSpec, ServiceState, ServiceStatus, ServiceSupervisor, StopOutcome,
    WaitPolicy,
};
