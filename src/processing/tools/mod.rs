//! External tool plumbing: the invoker primitive and tool discovery.

mod command;
mod toolchain;

pub use command::{ToolCommand, ToolOutput};
pub use toolchain::{Toolchain, THIRD_PARTY_DIR};
