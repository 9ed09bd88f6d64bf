// abcvm
// An ActionScript Byte Code virtual machine: loader, linker, interpreter,
// compiled tier and a queue-driven dispatcher

pub mod abc;
pub mod builtins;
pub mod config;
pub mod error;
pub mod jit;
pub mod vm;

pub use config::VmConfig;
pub use error::{ErrorKind, VmError, VmResult};
pub use vm::{AbcContext, AbcVm, Runtime, Value, VmHandle};
