//! Error types

use std::sync::Arc;

use uuid::Uuid;

use crate::activity::ActivityKind;
use crate::device::DeviceId;
use crate::permission::PermissionScope;

type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for activity and characteristic operations
///
/// Errors are cheap to clone so the same failure can be returned to the caller and published to event
/// subscribers.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: ErrorContext,
    source: Option<Cause>,
    message: String,
}

/// Structured identifiers describing what an [`Error`] was about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ErrorContext {
    /// The activity whose lifecycle operation failed
    pub activity: Option<ActivityKind>,
    /// The remote device involved
    pub device: Option<DeviceId>,
    /// The expected GATT service
    pub service: Option<Uuid>,
    /// The GATT characteristic involved
    pub characteristic: Option<Uuid>,
}

impl Error {
    /// Creates a new error of the given `kind` with a message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            context: ErrorContext::default(),
            source: None,
            message: message.into(),
        }
    }

    /// Creates a new error of the given `kind` wrapping a lower level cause.
    pub fn with_source<E>(kind: ErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error {
            kind,
            context: ErrorContext::default(),
            source: Some(Arc::new(source)),
            message: String::new(),
        }
    }

    pub(crate) fn for_activity(mut self, kind: ActivityKind) -> Self {
        self.context.activity = Some(kind);
        self
    }

    pub(crate) fn for_device(mut self, device: &DeviceId) -> Self {
        self.context.device = Some(device.clone());
        self
    }

    pub(crate) fn for_characteristic(mut self, service: Uuid, characteristic: Uuid) -> Self {
        self.context.service = Some(service);
        self.context.characteristic = Some(characteristic);
        self
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the structured context for this error.
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Returns the message for this error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if this error reports a characteristic fault of the given kind.
    pub fn is_characteristic(&self, kind: CharacteristicErrorKind) -> bool {
        self.kind == ErrorKind::Characteristic(kind)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.message.is_empty(), &self.source) {
            (true, None) => write!(f, "{}", &self.kind)?,
            (false, None) => write!(f, "{}: {}", &self.kind, &self.message)?,
            (true, Some(err)) => write!(f, "{}: {}", &self.kind, err)?,
            (false, Some(err)) => write!(f, "{}: {} ({})", &self.kind, &self.message, err)?,
        }
        if let Some(device) = &self.context.device {
            write!(f, " [device {device}")?;
            if let Some(characteristic) = self.context.characteristic {
                write!(f, ", characteristic {characteristic}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|x| {
            let x: &(dyn std::error::Error + 'static) = &**x;
            x
        })
    }
}

/// A list of general categories of error.
#[non_exhaustive]
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// the Bluetooth adapter is not available
    AdapterUnavailable,
    /// permission denied for {0}
    PermissionDenied(PermissionScope),
    /// failed to start, stop or reconfigure the activity
    ActivityConfiguration,
    /// device pairing or bonding failed
    Device,
    /// service error
    Service,
    /// characteristic error: {0}
    Characteristic(CharacteristicErrorKind),
    /// the operation is unsupported
    NotSupported,
    /// invalid parameter
    InvalidParameter,
    /// timed out
    Timeout,
    /// cancelled
    Cancelled,
    /// an internal error has occured
    Internal,
    /// error
    Other,
}

/// Faults specific to characteristic access.
#[non_exhaustive]
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CharacteristicErrorKind {
    /// characteristic not found
    NotFound,
    /// characteristic found in the wrong service
    FoundInWrongService,
    /// a read is already in progress
    AlreadyReading,
    /// received a value nobody asked for
    UnexpectedRead,
    /// the value could not be decoded
    Decode,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind,
            context: ErrorContext::default(),
            source: None,
            message: String::new(),
        }
    }
}

impl From<CharacteristicErrorKind> for Error {
    fn from(kind: CharacteristicErrorKind) -> Self {
        ErrorKind::Characteristic(kind).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::from(CharacteristicErrorKind::AlreadyReading)
            .for_device(&DeviceId::new("AA:BB"))
            .for_characteristic(Uuid::nil(), Uuid::nil());
        let text = err.to_string();
        assert!(text.starts_with("characteristic error: a read is already in progress"));
        assert!(text.contains("device AA:BB"));
        assert!(err.is_characteristic(CharacteristicErrorKind::AlreadyReading));
    }

    #[test]
    fn clones_share_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "radio off");
        let err = Error::with_source(ErrorKind::AdapterUnavailable, io);
        let copy = err.clone();
        assert_eq!(copy.kind(), ErrorKind::AdapterUnavailable);
        assert_eq!(
            std::error::Error::source(&copy).map(|e| e.to_string()),
            Some("radio off".to_owned())
        );
    }

    #[test]
    fn permission_kind_names_scope() {
        let err = Error::from(ErrorKind::PermissionDenied(PermissionScope::Scanner));
        assert_eq!(err.to_string(), "permission denied for scanner");
    }
}
