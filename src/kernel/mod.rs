//! Security kernel: labels, registry, policy engine, dispatcher.
//!
//! Control flow for one request: the [`dispatch::Dispatcher`] validates
//! the parameters and resolves the action, the [`policy::PolicyEngine`]
//! consults and possibly mutates the [`registry::Registry`], and the
//! dispatcher wraps the outcome in a [`dispatch::Response`].

pub mod dispatch;
pub mod error;
pub mod label;
pub mod policy;
pub mod registry;

pub use dispatch::{Command, Dispatcher, Request, Response, Touched};
pub use error::{Access, EntityKind, KernelError};
pub use label::{ClearanceScale, Label, Level};
pub use policy::{Mode, PolicyEngine, PolicySettings, WriteRule};
pub use registry::{ObjectRecord, Registry, SubjectRecord};
