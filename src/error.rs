use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while bringing up or running a bridge

#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the underlying system
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// the netmap device node could not be opened
    #[error("Unable to open {}: {source}", path.display())]
    DeviceUnavailable {
        /// device node that was tried
        path: PathBuf,
        /// error returned by open(2)
        source: io::Error,
    },

    /// the driver rejected the interface name
    #[error("Unable to register {name}: {source}")]
    RegistrationFailed {
        /// name passed to NIOCREGIF
        name: String,
        /// error returned by the ioctl
        source: io::Error,
    },

    /// the shared memory region could not be mapped
    #[error("Unable to mmap netmap memory: {0}")]
    MapFailed(io::Error),

    /// interface name is empty, too long or contains a NUL byte
    #[error("Invalid interface name: {0:?}")]
    InvalidName(String),

    /// the receiver thread could not be started
    #[error("Failed to spawn receiver thread: {0}")]
    SpawnFailed(io::Error),

    /// no link-layer address is known for the interface
    #[error("No hardware address found for {0}")]
    AddressNotFound(String),

    /// Invalid ring index
    #[error("Invalid ring index: {0}")]
    InvalidRingIndex(usize),

    /// a configuration value is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// The OS error number behind this error, if there is one.
    ///
    /// Hosts that report failures as errno values use this to translate.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::Io(e)
            | Error::DeviceUnavailable { source: e, .. }
            | Error::RegistrationFailed { source: e, .. }
            | Error::MapFailed(e)
            | Error::SpawnFailed(e) => e.raw_os_error(),
            Error::InvalidName(_) | Error::InvalidRingIndex(_) | Error::InvalidConfig(_) => {
                Some(libc::EINVAL)
            }
            Error::AddressNotFound(_) => Some(libc::ENOENT),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(e) => e,
            Error::DeviceUnavailable { source, .. } => source,
            e => io::Error::new(io::ErrorKind::Other, e.to_string()),
        }
    }
}
