use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::ptr::{self, NonNull};

use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::error::Error;
use crate::hwaddr::{self, MacAddr};
use crate::port::Port;
use crate::ring::Interface;
use crate::sys;

/// The shared region the driver mapped for us.
struct Mapping {
    base: NonNull<u8>,
    len: usize,
}

impl Mapping {
    fn new(fd: RawFd, len: usize) -> io::Result<Self> {
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(addr as *mut u8)
            .map(|base| Self { base, len })
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned NULL"))
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// A port registered with the netmap driver.
///
/// Dropping it unmaps the region and closes the descriptor, in that order.
pub struct NetmapPort {
    interface: Interface,
    // Field order matters: the mapping goes before the descriptor.
    mapping: Mapping,
    file: File,
    hwaddr: MacAddr,
}

// The mapping moves with the descriptor; ring access is partitioned by the bridge.
unsafe impl Send for NetmapPort {}
unsafe impl Sync for NetmapPort {}

impl NetmapPort {
    /// Open the device, register `config.ifname()` and map its rings.
    ///
    /// Anything acquired before a failure is released before returning.
    pub fn open(config: &BridgeConfig) -> Result<Self, Error> {
        config.validate()?;
        let name = config.ifname();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(config.device())
            .map_err(|source| Error::DeviceUnavailable {
                path: config.device().to_path_buf(),
                source,
            })?;

        let mut req = sys::NmReq::register(name, config.ringid());
        let rv = unsafe { libc::ioctl(file.as_raw_fd(), sys::NIOCREGIF as _, &mut req) };
        if rv == -1 {
            return Err(Error::RegistrationFailed {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        debug!(
            "{}: need {} MB, {} tx / {} rx rings",
            name,
            req.nr_memsize >> 20,
            req.nr_tx_rings,
            req.nr_rx_rings
        );

        let mapping =
            Mapping::new(file.as_raw_fd(), req.nr_memsize as usize).map_err(Error::MapFailed)?;
        if req.nr_offset as usize >= mapping.len {
            return Err(Error::MapFailed(io::Error::new(
                io::ErrorKind::InvalidData,
                "interface offset outside the mapped region",
            )));
        }
        // NETMAP_IF
        let interface = unsafe {
            let nifp = mapping.base.as_ptr().add(req.nr_offset as usize) as *mut sys::NetmapIf;
            Interface::from_raw(NonNull::new_unchecked(nifp), config.ringid())?
        };
        debug!(
            "{}: bound tx rings {:?}, rx rings {:?}",
            name,
            interface.bound_tx_rings(),
            interface.bound_rx_rings()
        );

        let hwaddr = match config.hardware_address_override() {
            Some(mac) => mac,
            None => hwaddr::resolve(name).unwrap_or_else(|e| {
                if !name.starts_with("vale") {
                    warn!("netmap:{}: failed to retrieve MAC address: {}", name, e);
                }
                MacAddr::ZERO
            }),
        };

        Ok(Self {
            interface,
            mapping,
            file,
            hwaddr,
        })
    }

    /// Size of the shared region.
    pub fn memsize(&self) -> usize {
        self.mapping.len
    }

    /// Unmap and close. Equivalent to dropping the port.
    pub fn close(self) {
        debug!("{}: closing netmap port", self.interface.name());
    }

    fn ioctl(&self, request: u32) -> io::Result<()> {
        let rv = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, ptr::null_mut::<libc::c_void>()) };
        if rv < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Port for NetmapPort {
    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn tx_sync(&self) -> io::Result<()> {
        self.ioctl(sys::NIOCTXSYNC)
    }

    fn rx_sync(&self) -> io::Result<()> {
        self.ioctl(sys::NIOCRXSYNC)
    }

    fn hardware_address(&self) -> MacAddr {
        self.hwaddr
    }
}

impl AsFd for NetmapPort {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for NetmapPort {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_node_is_unavailable() {
        let cfg = BridgeConfig::new("em0").device_path("/nonexistent/netmap");
        match NetmapPort::open(&cfg) {
            Err(Error::DeviceUnavailable { path, source }) => {
                assert_eq!(path, std::path::Path::new("/nonexistent/netmap"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            Err(e) => panic!("expected DeviceUnavailable, got {e:?}"),
            Ok(_) => panic!("opened a device that does not exist"),
        }
    }

    #[test]
    fn non_netmap_node_fails_registration() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let cfg = BridgeConfig::new("em0").device_path(file.path());
        match NetmapPort::open(&cfg) {
            Err(Error::RegistrationFailed { name, .. }) => assert_eq!(name, "em0"),
            Err(e) => panic!("expected RegistrationFailed, got {e:?}"),
            Ok(_) => panic!("registered on a regular file"),
        }
    }

    #[test]
    fn invalid_name_fails_before_open() {
        let cfg = BridgeConfig::new("").device_path("/nonexistent/netmap");
        assert!(matches!(NetmapPort::open(&cfg), Err(Error::InvalidName(_))));
    }
}
