mod privilege_wrapper;
pub mod process;

pub use privilege_wrapper::{PrivilegeWrapper, PrivilegedCommandError};
pub use process::{CommandError, CommandOutcome, ProcessCommand};
