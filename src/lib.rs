//! capctl: Conditional Access policy-as-code for Microsoft Entra ID.
//!
//! The analysis core lives in [`policy`]; [`graph`] talks to Microsoft Graph
//! and [`cmd`] wires both into the command line.

pub mod cmd;
pub mod config;
pub mod error;
pub mod graph;
pub mod policy;

pub use error::{CapctlError, Result};
