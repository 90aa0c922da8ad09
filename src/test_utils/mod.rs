//! Test helpers shared by the unit test modules
mod common;
mod mock_agent;

pub(crate) use common::*;
pub use mock_agent::*;
