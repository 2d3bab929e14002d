//! Container Runtime Adapter: a typed wrapper over the Docker daemon.
//!
//! The live implementation ([`BollardRuntime`]) wraps a single
//! `bollard::Docker` handle; the [`ContainerRuntime`] trait is the seam
//! the orchestrator and strategies program against, so tests can swap in
//! a fake.

mod bollard_runtime;
mod error;
mod runtime;
mod types;

pub mod testing;

pub use bollard_runtime::BollardRuntime;
pub use error::RuntimeError;
pub use runtime::{ContainerRuntime, EventStream, ExecHandle, ExecStream, RegistryAuth};
pub use types::*;
