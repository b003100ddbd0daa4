//! Stable error code table (spec §6/§7) and the taxonomy it composes from.

use std::fmt;

/// Low-order OS errno, composed into every [`SurfaceError`] the way the
/// original engine tags a class/mnemonic pair with the OS error that caused it.
pub type Errno = i32;

/// Error classes, mirroring the stable integer table in spec §6.
///
/// Kinds group by HTTP-style status class: 4xx are caller mistakes, 412 are
/// state mismatches, 500 are internal/backend failures, the rest are
/// protocol-level (not-supported / binder / egl).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("invalid arguments")]
    InvalidArguments,
    #[error("operation not permitted")]
    NoPermission,
    #[error("no buffer available")]
    NoBuffer,
    #[error("no such cache entry")]
    NoEntry,
    #[error("value out of range")]
    OutOfRange,

    #[error("invalid operating state")]
    InvalidOperating,
    #[error("no consumer registered")]
    NoConsumer,
    #[error("not initialized")]
    NotInit,
    #[error("type error")]
    TypeError,
    #[error("consumer disconnected")]
    ConsumerDisconnected,
    #[error("buffer state invalid for this operation")]
    BufferStateInvalid,
    #[error("buffer queue full")]
    BufferQueueFull,
    #[error("buffer already in cache")]
    BufferIsInCache,
    #[error("buffer not in cache")]
    BufferNotInCache,

    #[error("api call failed")]
    ApiFailed,
    #[error("internal error")]
    Internal,
    #[error("out of memory")]
    NoMem,
    #[error("allocator (HDI) error")]
    HdiError,

    #[error("operation not supported")]
    NotSupported,
    #[error("binder transport error")]
    Binder,
    #[error("egl error")]
    Egl,
}

impl SurfaceError {
    /// The stable numeric status class from spec §6.
    pub fn class(&self) -> u32 {
        use SurfaceError::*;
        match self {
            InvalidArguments | NoPermission | NoBuffer | NoEntry | OutOfRange => 400,
            InvalidOperating
            | NoConsumer
            | NotInit
            | TypeError
            | ConsumerDisconnected
            | BufferStateInvalid
            | BufferQueueFull
            | BufferIsInCache
            | BufferNotInCache => 412,
            ApiFailed | Internal | NoMem | HdiError => 500,
            NotSupported => 501,
            Binder => 504,
            Egl => 600,
        }
    }

    /// Short mnemonic used in logs and the textual rendering below.
    pub fn mnemonic(&self) -> &'static str {
        use SurfaceError::*;
        match self {
            InvalidArguments => "INVALID_ARGUMENTS",
            NoPermission => "NO_PERMISSION",
            NoBuffer => "NO_BUFFER",
            NoEntry => "NO_ENTRY",
            OutOfRange => "OUT_OF_RANGE",
            InvalidOperating => "INVALID_OPERATING",
            NoConsumer => "NO_CONSUMER",
            NotInit => "NOT_INIT",
            TypeError => "TYPE_ERROR",
            ConsumerDisconnected => "CONSUMER_DISCONNECTED",
            BufferStateInvalid => "BUFFER_STATE_INVALID",
            BufferQueueFull => "BUFFER_QUEUE_FULL",
            BufferIsInCache => "BUFFER_IS_INCACHE",
            BufferNotInCache => "BUFFER_NOT_INCACHE",
            ApiFailed => "API_FAILED",
            Internal => "INTERNAL",
            NoMem => "NO_MEM",
            HdiError => "HDI_ERROR",
            NotSupported => "NOT_SUPPORTED",
            Binder => "BINDER",
            Egl => "EGL",
        }
    }
}

/// A [`SurfaceError`] composed with the low-order OS errno active when it was
/// raised, per spec §6 ("errors compose with a low-order 'operating-system
/// errno' component so a caller can print both").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposedError {
    pub kind: SurfaceError,
    pub errno: Errno,
}

impl ComposedError {
    pub fn new(kind: SurfaceError) -> Self {
        Self { kind, errno: 0 }
    }

    pub fn with_errno(kind: SurfaceError, errno: Errno) -> Self {
        Self { kind, errno }
    }
}

impl fmt::Display for ComposedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): errno {}",
            self.kind.class(),
            self.kind.mnemonic(),
            self.kind,
            self.errno
        )
    }
}

impl std::error::Error for ComposedError {}

impl From<SurfaceError> for ComposedError {
    fn from(kind: SurfaceError) -> Self {
        ComposedError::new(kind)
    }
}

pub type Result<T> = std::result::Result<T, SurfaceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_errno_carries_the_os_errno_through_display() {
        let composed = ComposedError::with_errno(SurfaceError::NoBuffer, 11);
        assert_eq!(composed.errno, 11);
        assert!(composed.to_string().contains("errno 11"));
    }

    #[test]
    fn new_defaults_errno_to_zero() {
        assert_eq!(ComposedError::new(SurfaceError::Internal).errno, 0);
    }
}
