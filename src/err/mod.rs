use std::fmt::{Debug, Display, Formatter};

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Machine-checkable classification of a lock failure.
///
/// Callers are expected to match on this: `would_block` outcomes are routine
/// under non-blocking acquisition, everything else is a real failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockErrorKind {
    /// Non-blocking acquisition found the thread-level lock incompatible.
    ThreadLevelWouldBlock,
    /// Non-blocking acquisition found the process-level lock incompatible.
    ProcessLevelWouldBlock,
    /// A thread attempted to reacquire a lock it already holds without
    /// opting into reentrancy, or with a different mode than it holds.
    RecursiveDeadlock,
    /// Failure from the OS: opening the locked file, the file-lock syscall,
    /// or a poisoned internal mutex.
    Io,
}

pub struct PathLockError {
    kind: LockErrorKind,
    err: String,
    file: &'static str,
    line: u32,
    // Store Send + Sync error for thread-safety; we can still expose it as `&dyn Error` in `source()`
    source: Option<BoxedError>,
}

impl PathLockError {
    pub fn new(
        kind: LockErrorKind,
        err: impl Into<String>,
        file: &'static str,
        line: u32,
        source: Option<BoxedError>,
    ) -> Self {
        Self {
            kind,
            err: err.into(),
            file,
            line,
            source,
        }
    }

    pub fn kind(&self) -> LockErrorKind {
        self.kind
    }

    /// True for both the thread-level and the process-level would-block kinds.
    pub fn is_would_block(&self) -> bool {
        matches!(
            self.kind,
            LockErrorKind::ThreadLevelWouldBlock | LockErrorKind::ProcessLevelWouldBlock
        )
    }

    pub fn is_recursive_deadlock(&self) -> bool {
        self.kind == LockErrorKind::RecursiveDeadlock
    }
}

#[macro_export]
macro_rules! path_lock_error {
    ($kind:ident, $fmt:expr $(, $($args:tt)*)?) => {
        $crate::err::PathLockError::new(
            $crate::err::LockErrorKind::$kind,
            format!($fmt $(,$($args)*)?),
            file!(), line!(), None)
    };
}

#[macro_export]
macro_rules! path_lock_error_with_source {
    ($kind:ident, $source:expr, $fmt:expr $(, $($args:tt)*)?) => {
        $crate::err::PathLockError::new(
            $crate::err::LockErrorKind::$kind,
            format!($fmt $(,$($args)*)?),
            file!(), line!(), Some(Box::new($source) as $crate::err::BoxedError))
    }
}

impl Debug for PathLockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]:{} {:?} {}", self.file, self.line, self.kind, self.err)
    }
}

impl Display for PathLockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.err)
    }
}

impl std::error::Error for PathLockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error))
    }
}

/// This is defined as a convenience.
pub type Result<T> = std::result::Result<T, PathLockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_predicates() {
        let thread = path_lock_error!(ThreadLevelWouldBlock, "busy");
        let process = path_lock_error!(ProcessLevelWouldBlock, "busy");
        let recursive = path_lock_error!(RecursiveDeadlock, "held");
        let io = path_lock_error!(Io, "boom");

        assert!(thread.is_would_block());
        assert!(process.is_would_block());
        assert!(!recursive.is_would_block());
        assert!(!io.is_would_block());

        assert!(recursive.is_recursive_deadlock());
        assert!(!thread.is_recursive_deadlock());

        assert_eq!(thread.kind(), LockErrorKind::ThreadLevelWouldBlock);
        assert_eq!(process.kind(), LockErrorKind::ProcessLevelWouldBlock);
    }

    #[test]
    fn debug_carries_location_and_kind() {
        let err = path_lock_error!(Io, "cannot open {}", "/tmp/x");
        let dbg = format!("{:?}", err);
        assert!(dbg.contains("err/mod.rs"));
        assert!(dbg.contains("Io"));
        assert!(dbg.contains("cannot open /tmp/x"));
        assert_eq!(format!("{}", err), "cannot open /tmp/x");
    }

    #[test]
    fn source_is_preserved() {
        let inner = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = path_lock_error_with_source!(Io, inner, "failed to open lock file");
        let source = std::error::Error::source(&err).expect("source should be set");
        assert!(source.to_string().contains("denied"));
    }
}
