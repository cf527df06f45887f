use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// No response within the allotted budget.
    Timeout,
    /// The daemon or device refused the operation in its current state.
    CommandRejected,
    /// The command was accepted but produced no output within budget.
    ShellUnresponsive,
    SyncFailure,
    InstallFailure,
    Io,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "ERR_TIMEOUT",
            ErrorKind::CommandRejected => "ERR_COMMAND_REJECTED",
            ErrorKind::ShellUnresponsive => "ERR_SHELL_UNRESPONSIVE",
            ErrorKind::SyncFailure => "ERR_SYNC",
            ErrorKind::InstallFailure => "ERR_INSTALL",
            ErrorKind::Io => "ERR_IO",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message} ({code})", code = .kind.code())]
pub struct DeviceError {
    pub kind: ErrorKind,
    pub message: String,
    /// Structured code reported by the device, e.g. `INSTALL_FAILED_OLDER_SDK`.
    pub error_code: Option<String>,
    #[source]
    pub cause: Option<Box<DeviceError>>,
}

impl DeviceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            error_code: None,
            cause: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CommandRejected, message)
    }

    pub fn unresponsive(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ShellUnresponsive, message)
    }

    pub fn sync(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyncFailure, message)
    }

    pub fn install(message: impl Into<String>, error_code: Option<String>) -> Self {
        Self {
            error_code,
            ..Self::new(ErrorKind::InstallFailure, message)
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Re-wraps a lower-level failure raised inside an install workflow.
    /// Install failures pass through untouched.
    pub fn into_install_failure(self) -> Self {
        if self.kind == ErrorKind::InstallFailure {
            return self;
        }
        Self {
            kind: ErrorKind::InstallFailure,
            message: self.message.clone(),
            error_code: None,
            cause: Some(Box::new(self)),
        }
    }
}
