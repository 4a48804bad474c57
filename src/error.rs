//! Error kinds surfaced by the storage engine (spec.md §7) and their mapping
//! onto POSIX errno values, the way `rufs` maps its own failures via the
//! `err!` macro.

use std::fmt;
use std::io::Error as IoError;

/// (INTERNAL) Constructs an [`std::io::Error`] from an `errno`.
#[macro_export]
macro_rules! err {
	($name:ident) => {
		std::io::Error::from_raw_os_error(libc::$name)
	};
}

/// One of the error kinds named by spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// Free-block or free-inode count insufficient.
	NoSpace,
	/// Name already present when adding a directory entry.
	Exists,
	/// `rmdir`/`rename` target directory has entries.
	NotEmpty,
	/// Lookup miss on unlink/rename (lookup itself returns a null inode,
	/// not this error).
	NotFound,
	/// Name exceeds 255 bytes.
	NameTooLong,
	/// Checksum mismatch, malformed record, or impossible allocator state.
	Io,
	/// Bad argument.
	Invalid,
	/// Capability/ownership check failed.
	Permission,
	/// Operation not allowed on this inode/kind.
	NotAllowed,
}

impl ErrorKind {
	/// The POSIX errno this kind maps to.
	pub fn errno(self) -> i32 {
		match self {
			Self::NoSpace => libc::ENOSPC,
			Self::Exists => libc::EEXIST,
			Self::NotEmpty => libc::ENOTEMPTY,
			Self::NotFound => libc::ENOENT,
			Self::NameTooLong => libc::ENAMETOOLONG,
			Self::Io => libc::EIO,
			Self::Invalid => libc::EINVAL,
			Self::Permission => libc::EACCES,
			Self::NotAllowed => libc::EPERM,
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::NoSpace => "no space left on device",
			Self::Exists => "entry already exists",
			Self::NotEmpty => "directory not empty",
			Self::NotFound => "no such entry",
			Self::NameTooLong => "name too long",
			Self::Io => "filesystem I/O error",
			Self::Invalid => "invalid argument",
			Self::Permission => "permission denied",
			Self::NotAllowed => "operation not permitted",
		};
		f.write_str(s)
	}
}

impl std::error::Error for ErrorKind {}

impl From<ErrorKind> for IoError {
	fn from(k: ErrorKind) -> Self {
		IoError::from_raw_os_error(k.errno())
	}
}

pub type Result<T> = std::io::Result<T>;

/// (INTERNAL) Turns an [`ErrorKind`] into an `Err(io::Error)` in one line,
/// the way `rufs`'s `iobail!` builds an `io::Error` from a `format!`.
macro_rules! bail {
	($kind:expr) => {
		return Err(std::io::Error::from($kind))
	};
}
pub(crate) use bail;
