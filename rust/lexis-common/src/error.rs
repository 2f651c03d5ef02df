use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// Returns `true` for errors the indexing pipeline recovers from locally
    /// (the offending term is skipped, the rest of the field is kept).
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::AllocationExhausted { .. })
    }

    pub fn allocation_exhausted(requested: usize, limit: usize) -> Error {
        ErrorKind::AllocationExhausted { requested, limit }.into()
    }

    pub fn precondition(operation: impl Into<String>, state: impl Into<String>) -> Error {
        ErrorKind::PreconditionViolation {
            operation: operation.into(),
            state: state.into(),
        }
        .into()
    }

    pub fn missing_attribute(field: impl Into<String>, attribute: impl Into<String>) -> Error {
        ErrorKind::MissingAttribute {
            field: field.into(),
            attribute: attribute.into(),
        }
        .into()
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
        .into()
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        ErrorKind::InvalidOperation { name: name.into() }.into()
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        ErrorKind::Io {
            context: context.into(),
            source,
        }
        .into()
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("allocation exhausted: {requested} bytes requested, block limit is {limit}")]
    AllocationExhausted { requested: usize, limit: usize },

    #[error("precondition violated: '{operation}' is not allowed in state {state}")]
    PreconditionViolation { operation: String, state: String },

    #[error("field '{field}' does not provide the required '{attribute}' attribute")]
    MissingAttribute { field: String, attribute: String },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}
