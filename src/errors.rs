use thiserror::Error;

pub type VmResult<T> = std::result::Result<T, VmError>;

#[derive(Debug, Error)]
pub enum VmError {
    // parse
    #[error("malformed class file: {0}")]
    ClassFormat(String),

    // resolution
    #[error("class not found: {0}")]
    ClassNotFound(String),

    // dispatch
    #[error("method not found: {class}.{method}{descriptor}")]
    MethodNotFound {
        class: String,
        method: String,
        descriptor: String,
    },
    #[error("no code and no native binding for {class}.{method}")]
    CodeMissing { class: String, method: String },

    // runtime
    #[error("expected {expected} on the operand stack, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("integer division by zero")]
    DivisionByZero,
    #[error("unknown opcode {op:#04x} at ip {ip}")]
    UnknownOpcode { op: u8, ip: usize },
    #[error("instruction pointer {0} outside code bounds")]
    PcOutOfBounds(usize),
    #[error("local variable slot {0} out of range")]
    LocalOutOfRange(usize),
    #[error("array index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i32, len: usize },
    #[error("constant pool index {0} is not usable here")]
    InvalidConstant(u16),
    #[error("malformed descriptor {0:?}")]
    BadDescriptor(String),
    #[error("unsupported array type code {0}")]
    UnsupportedArrayType(u8),
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for VmError {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        match err {
            nom::Err::Incomplete(_) => VmError::ClassFormat("truncated input".to_string()),
            nom::Err::Error(e) | nom::Err::Failure(e) => VmError::ClassFormat(format!(
                "{:?} with {} bytes unconsumed",
                e.code,
                e.input.len()
            )),
        }
    }
}
