use snni_utils::errors::{ErrorWithBody, SnniErrorBody, SnniErrorKind};
use std::sync::Arc;

#[doc(hidden)]
#[macro_export]
macro_rules! runtime_error {
    ($($x:tt)*) => {
        $crate::errors::Error::new(
            anyhow::anyhow!($($x)*),
            snni_utils::errors::SnniErrorKind::RuntimeError,
        )
    };
}

/// Error for shapes, lengths or scales that disagree with what the caller declared.
/// Always raised before any protocol primitive runs.
#[doc(hidden)]
#[macro_export]
macro_rules! precondition_error {
    ($($x:tt)*) => {
        $crate::errors::Error::new(
            anyhow::anyhow!($($x)*),
            snni_utils::errors::SnniErrorKind::PreconditionViolation,
        )
    };
}

#[derive(Clone)]
pub struct Error {
    // Note: we use Arc to make it clonable
    inner: Arc<anyhow::Error>,
    pub kind: SnniErrorKind,
}

impl Error {
    pub fn new(err: anyhow::Error, kind: SnniErrorKind) -> Self {
        Self {
            inner: Arc::new(err),
            kind,
        }
    }

    pub fn is_precondition_violation(&self) -> bool {
        self.kind == SnniErrorKind::PreconditionViolation
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.inner, f)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.inner, f)
    }
}

impl<E> From<E> for Error
where
    E: Into<anyhow::Error>,
{
    fn from(error: E) -> Self {
        Self::new(error.into(), SnniErrorKind::RuntimeError)
    }
}

impl ErrorWithBody for Error {
    fn get_body(self) -> Box<SnniErrorBody> {
        let mut body = snni_utils::error_body!(self.kind, "{}", self.inner);
        body.backtrace = format!("{:?}", self.inner);
        Box::new(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let e = runtime_error!("engine failed in round {}", 4);
        assert!(!e.is_precondition_violation());
        assert_eq!(e.to_string(), "engine failed in round 4");

        let e = precondition_error!("expected {} elements", 16);
        assert!(e.is_precondition_violation());
        let body = e.clone().get_body();
        assert_eq!(body.kind, SnniErrorKind::PreconditionViolation);
        assert_eq!(body.message, "expected 16 elements");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing stat file");
        let e: Error = io.into();
        assert_eq!(e.kind, SnniErrorKind::RuntimeError);
        assert!(e.to_string().contains("missing stat file"));
    }
}
