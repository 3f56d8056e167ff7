pub mod error;
pub mod fs;

pub use error::{ConvertError, ConvertResult, PathError, ToolError, ToolResult};
pub use fs::{
    copy_new,
    get_extension,
    is_regular_file,
    path_taken,
    remove_if_exists,
};
