// abcvm Error Handling Module
// One error type for loading, linking and execution, with script-visible payloads

#[cfg(not(target_arch = "wasm32"))]
use colored::*;
use std::fmt;

use crate::abc::reader::ReadError;
use crate::vm::value::Value;

/// Types of errors raised by the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or truncated ABC input
    CorruptAbc,
    /// Recognized by the format but not implemented
    Unsupported,
    TypeError,
    ArgumentError,
    ReferenceError,
    RangeError,
    /// Operand stack or call depth exceeded
    StackOverflow,
    /// Pop from an empty operand stack
    EmptyStack,
    /// Interface member without an implementation
    NotLinkable,
    /// Value raised by a `throw` instruction
    Thrown,
    RuntimeError,
}

impl ErrorKind {
    /// Whether a script exception handler may intercept this kind
    pub fn is_catchable(self) -> bool {
        matches!(
            self,
            ErrorKind::TypeError
                | ErrorKind::ArgumentError
                | ErrorKind::ReferenceError
                | ErrorKind::RangeError
                | ErrorKind::Thrown
        )
    }

    /// Name of the built-in error class that represents this kind in scripts
    pub fn script_class_name(self) -> &'static str {
        match self {
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ArgumentError => "ArgumentError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
            _ => "Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::CorruptAbc => write!(f, "CorruptAbc"),
            ErrorKind::Unsupported => write!(f, "Unsupported"),
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::ArgumentError => write!(f, "ArgumentError"),
            ErrorKind::ReferenceError => write!(f, "ReferenceError"),
            ErrorKind::RangeError => write!(f, "RangeError"),
            ErrorKind::StackOverflow => write!(f, "StackOverflow"),
            ErrorKind::EmptyStack => write!(f, "EmptyStack"),
            ErrorKind::NotLinkable => write!(f, "NotLinkable"),
            ErrorKind::Thrown => write!(f, "Error"),
            ErrorKind::RuntimeError => write!(f, "RuntimeError"),
        }
    }
}

/// A frame of the script call stack captured while unwinding
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub function_name: String,
    pub offset: usize,
}

impl StackFrame {
    pub fn new(function_name: impl Into<String>, offset: usize) -> Self {
        Self {
            function_name: function_name.into(),
            offset,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  at {} (+{})", self.function_name, self.offset)
    }
}

/// Main error type
#[derive(Debug, Clone)]
pub struct VmError {
    pub kind: ErrorKind,
    pub message: String,
    /// Script-visible error object, set once the error has been materialized
    pub thrown: Option<Value>,
    pub stack_trace: Vec<StackFrame>,
}

impl VmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            thrown: None,
            stack_trace: Vec::new(),
        }
    }

    /// An error carrying a script value raised by `throw`
    pub fn thrown(value: Value) -> Self {
        Self {
            kind: ErrorKind::Thrown,
            message: String::from("uncaught exception"),
            thrown: Some(value),
            stack_trace: Vec::new(),
        }
    }

    pub fn with_thrown(mut self, value: Value) -> Self {
        self.thrown = Some(value);
        self
    }

    pub fn push_frame(&mut self, frame: StackFrame) {
        self.stack_trace.push(frame);
    }

    pub fn is_catchable(&self) -> bool {
        self.kind.is_catchable()
    }

    /// Format the error for the terminal
    #[cfg(not(target_arch = "wasm32"))]
    pub fn format(&self) -> String {
        let mut output = format!(
            "{}: {}",
            self.kind.to_string().red().bold(),
            self.message.white().bold()
        );
        for frame in &self.stack_trace {
            output.push('\n');
            output.push_str(&frame.to_string().dimmed().to_string());
        }
        output
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for frame in &self.stack_trace {
            write!(f, "\n{}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for VmError {}

impl From<ReadError> for VmError {
    fn from(err: ReadError) -> Self {
        VmError::new(ErrorKind::CorruptAbc, err.to_string())
    }
}

pub type VmResult<T> = Result<T, VmError>;

pub fn corrupt(message: impl Into<String>) -> VmError {
    VmError::new(ErrorKind::CorruptAbc, message)
}

pub fn unsupported(message: impl Into<String>) -> VmError {
    VmError::new(ErrorKind::Unsupported, message)
}

pub fn type_error(message: impl Into<String>) -> VmError {
    VmError::new(ErrorKind::TypeError, message)
}

pub fn argument_error(message: impl Into<String>) -> VmError {
    VmError::new(ErrorKind::ArgumentError, message)
}

pub fn reference_error(message: impl Into<String>) -> VmError {
    VmError::new(ErrorKind::ReferenceError, message)
}

pub fn range_error(message: impl Into<String>) -> VmError {
    VmError::new(ErrorKind::RangeError, message)
}

pub fn runtime_error(message: impl Into<String>) -> VmError {
    VmError::new(ErrorKind::RuntimeError, message)
}
