//! Link-layer address lookup through the host's interface address list.

use std::ffi::CStr;
use std::fmt;
use std::io;
use std::ptr;

use crate::error::Error;

/// A 6-byte Ethernet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Placeholder used when no address could be found.
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// Raw bytes.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Whether this is the all-zero placeholder.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }
}

/// Find the link-layer address of `ifname`.
///
/// Walks `getifaddrs(3)` looking for the interface's `AF_PACKET` (Linux) or
/// `AF_LINK` (BSD) entry. Absence is reported as [`Error::AddressNotFound`];
/// callers are expected to carry on with [`MacAddr::ZERO`].
pub fn resolve(ifname: &str) -> Result<MacAddr, Error> {
    let mut head: *mut libc::ifaddrs = ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    let mut found = None;
    let mut cur = head;
    while !cur.is_null() {
        let ifa = unsafe { &*cur };
        cur = ifa.ifa_next;

        if ifa.ifa_addr.is_null() || ifa.ifa_name.is_null() {
            continue;
        }
        let name = unsafe { CStr::from_ptr(ifa.ifa_name) };
        if name.to_bytes() != ifname.as_bytes() {
            continue;
        }
        if let Some(mac) = unsafe { link_address(ifa.ifa_addr) } {
            found = Some(mac);
            break;
        }
    }
    unsafe { libc::freeifaddrs(head) };

    found.ok_or_else(|| Error::AddressNotFound(ifname.to_string()))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn link_address(sa: *const libc::sockaddr) -> Option<MacAddr> {
    if (*sa).sa_family as libc::c_int != libc::AF_PACKET {
        return None;
    }
    let sll = &*(sa as *const libc::sockaddr_ll);
    if sll.sll_halen < 6 {
        return None;
    }
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&sll.sll_addr[..6]);
    Some(MacAddr(mac))
}

#[cfg(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "macos",
    target_os = "ios"
))]
unsafe fn link_address(sa: *const libc::sockaddr) -> Option<MacAddr> {
    if (*sa).sa_family as libc::c_int != libc::AF_LINK {
        return None;
    }
    let sdl = &*(sa as *const libc::sockaddr_dl);
    if sdl.sdl_alen < 6 {
        return None;
    }
    // LLADDR: the address follows the name inside sdl_data.
    let lladdr = (sdl.sdl_data.as_ptr() as *const u8).add(sdl.sdl_nlen as usize);
    let mut mac = [0u8; 6];
    ptr::copy_nonoverlapping(lladdr, mac.as_mut_ptr(), 6);
    Some(MacAddr(mac))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "macos",
    target_os = "ios"
)))]
unsafe fn link_address(_sa: *const libc::sockaddr) -> Option<MacAddr> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_as_colon_hex() {
        let mac = MacAddr([0x02, 0x00, 0x5e, 0x10, 0xab, 0x0c]);
        assert_eq!(mac.to_string(), "02:00:5e:10:ab:0c");
        assert!(!mac.is_zero());
        assert!(MacAddr::ZERO.is_zero());
    }

    #[test]
    fn unknown_interface_is_not_found() {
        match resolve("nm-vif-absent0") {
            Err(Error::AddressNotFound(name)) => assert_eq!(name, "nm-vif-absent0"),
            other => panic!("expected AddressNotFound, got {other:?}"),
        }
    }
}
