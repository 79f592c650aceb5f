//! Unified kernel error type
//!
//! `KernelError` uses `#[repr(i32)]` with discriminants equal to errno values.
//! This eliminates all error translation - the discriminant IS the errno.

/// Kernel error type with errno values as discriminants
///
/// Each variant's value is its errno. This allows zero-cost conversion
/// to syscall return values via simple negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum KernelError {
    /// Operation not permitted (EPERM)
    NotPermitted = 1,
    /// No such file or directory (ENOENT)
    NotFound = 2,
    /// No such process (ESRCH)
    NoProcess = 3,
    /// I/O error (EIO)
    Io = 5,
    /// No such device or address (ENXIO)
    NoDeviceOrAddress = 6,
    /// Bad file descriptor (EBADF)
    BadFd = 9,
    /// Resource temporarily unavailable / would block (EAGAIN/EWOULDBLOCK)
    WouldBlock = 11,
    /// Out of memory (ENOMEM)
    OutOfMemory = 12,
    /// Permission denied (EACCES)
    PermissionDenied = 13,
    /// Bad address (EFAULT)
    BadAddress = 14,
    /// Device or resource busy (EBUSY)
    Busy = 16,
    /// File exists (EEXIST)
    AlreadyExists = 17,
    /// Cross-device link (EXDEV)
    CrossDevice = 18,
    /// No such device (ENODEV)
    NoDevice = 19,
    /// Not a directory (ENOTDIR)
    NotDirectory = 20,
    /// Is a directory (EISDIR)
    IsDirectory = 21,
    /// Invalid argument (EINVAL)
    InvalidArgument = 22,
    /// Too many open files (EMFILE)
    ProcessFileLimit = 24,
    /// File too large (EFBIG)
    FileTooLarge = 27,
    /// No space left on device (ENOSPC)
    NoSpace = 28,
    /// Illegal seek (ESPIPE)
    IllegalSeek = 29,
    /// Read-only file system (EROFS)
    ReadOnlyFs = 30,
    /// Broken pipe (EPIPE)
    BrokenPipe = 32,
    /// Numerical result out of range (ERANGE)
    Range = 34,
    /// File name too long (ENAMETOOLONG)
    NameTooLong = 36,
    /// Directory not empty (ENOTEMPTY)
    DirectoryNotEmpty = 39,
    /// Too many levels of symbolic links (ELOOP)
    TooManySymlinks = 40,
    /// Message too long (EMSGSIZE)
    MessageTooLong = 90,
    /// Socket operation on non-socket (ENOTSOCK)
    NotSocket = 88,
    /// Destination address required (EDESTADDRREQ)
    DestAddrRequired = 89,
    /// Protocol not supported (EPROTONOSUPPORT)
    ProtocolNotSupported = 93,
    /// Operation not supported (EOPNOTSUPP)
    OperationNotSupported = 95,
    /// Address family not supported (EAFNOSUPPORT)
    AddressFamilyNotSupported = 97,
    /// Address already in use (EADDRINUSE)
    AddressInUse = 98,
    /// Cannot assign requested address (EADDRNOTAVAIL)
    AddressNotAvailable = 99,
    /// Network is unreachable (ENETUNREACH)
    NetworkUnreachable = 101,
    /// No buffer space available (ENOBUFS)
    NoBufferSpace = 105,
    /// Transport endpoint is already connected (EISCONN)
    AlreadyConnected = 106,
    /// Transport endpoint is not connected (ENOTCONN)
    NotConnected = 107,
    /// Cannot send after transport endpoint shutdown (ESHUTDOWN)
    Shutdown = 108,
    /// Host is unreachable (EHOSTUNREACH)
    HostUnreachable = 113,
}

impl KernelError {
    /// Return negative errno for syscall return (i64)
    ///
    /// Example: `KernelError::BadFd.sysret()` returns -9
    #[inline]
    pub const fn sysret(self) -> i64 {
        -(self as i32 as i64)
    }

    /// Get the positive errno value
    #[inline]
    pub const fn errno(self) -> i32 {
        self as i32
    }
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;
