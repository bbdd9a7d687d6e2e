//! External process supervisor adapter.
//!
//! The supervisor is a stateful singleton reachable only through its CLI.
//! [`SupervisorPort`] is the narrow seam around it, [`Pm2Cli`] the production
//! implementation, and [`SupervisorClient`] the validated surface the HTTP
//! layer calls.

pub mod client;
#[cfg(test)]
pub mod fake;
pub mod model;
pub mod pm2;
pub mod port;

pub use client::{AddOutcome, AddRequest, SupervisorClient};
pub use model::{Action, AppDeclaration, AppStatus, ManagedApp};
pub use pm2::Pm2Cli;
pub use port::{PortError, SupervisorPort};
