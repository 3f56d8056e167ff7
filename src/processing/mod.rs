pub mod batch;
pub mod icc;
pub mod pipeline;
pub mod tools;
pub mod workspace;

pub use batch::{Converter, Dispatcher};
pub use icc::{IccCatalog, IccProfile, PROFILES_DIR};
pub use pipeline::{Pipeline, PublishLocks, RawConverter};
pub use tools::{ToolCommand, ToolOutput, Toolchain, THIRD_PARTY_DIR};
pub use workspace::{next_free_output, Workspace, OUTPUT_EXTENSION, SUBFOLDER};
