//! IKEv2 IKE_SA initial exchange (IKE_SA_INIT / IKE_INTERMEDIATE) task.
//!
//! `ike_init_task::task::IkeInitTask` is the state machine a larger IKE
//! daemon drives once per new or rekeyed IKE_SA; every other module in this
//! crate is one of the collaborators `SPEC_FULL.md` §6 names, either as a
//! trait the embedding daemon implements over its own types, or (for
//! `keyexchange`, `keymat`, `noncegen`, `payload`) a real default
//! implementation good enough to drive the task end to end.

pub mod bus;
pub mod config;
pub mod error;
pub mod keyexchange;
pub mod keymat;
pub mod message;
pub mod noncegen;
pub mod payload;
pub mod proposal;
pub mod sa;
pub mod task;

pub use config::Settings;
pub use error::TaskError;
pub use task::{IkeInitTask, TaskStatus, TaskType};
