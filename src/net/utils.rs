//! Address resolution and `sockaddr` conversion helpers.

use libc::{AF_INET, AF_INET6, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t};

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};

/// Resolves `host` with a blocking lookup and returns the first address.
pub(crate) fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for `{host}`"),
        )
    })
}

pub(crate) fn socketaddr_to_raw(address: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    let length = match address {
        SocketAddr::V4(v4) => {
            let mut raw: sockaddr_in = unsafe { mem::zeroed() };
            raw.sin_family = AF_INET as libc::sa_family_t;
            raw.sin_port = v4.port().to_be();
            raw.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(v4.ip().octets()),
            };
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly"
            ))]
            {
                raw.sin_len = mem::size_of::<sockaddr_in>() as u8;
            }

            unsafe { (&mut storage as *mut sockaddr_storage as *mut sockaddr_in).write(raw) };
            mem::size_of::<sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let mut raw: sockaddr_in6 = unsafe { mem::zeroed() };
            raw.sin6_family = AF_INET6 as libc::sa_family_t;
            raw.sin6_port = v6.port().to_be();
            raw.sin6_flowinfo = v6.flowinfo();
            raw.sin6_addr = libc::in6_addr {
                s6_addr: v6.ip().octets(),
            };
            raw.sin6_scope_id = v6.scope_id();
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly"
            ))]
            {
                raw.sin6_len = mem::size_of::<sockaddr_in6>() as u8;
            }

            unsafe { (&mut storage as *mut sockaddr_storage as *mut sockaddr_in6).write(raw) };
            mem::size_of::<sockaddr_in6>()
        }
    };

    (storage, length as socklen_t)
}

pub(crate) fn raw_to_socketaddr(storage: &sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as i32 {
        AF_INET => {
            let raw = unsafe { &*(storage as *const sockaddr_storage as *const sockaddr_in) };
            let ip = Ipv4Addr::from(raw.sin_addr.s_addr.to_ne_bytes());

            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(raw.sin_port))))
        }
        AF_INET6 => {
            let raw = unsafe { &*(storage as *const sockaddr_storage as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(raw.sin6_addr.s6_addr);

            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(raw.sin6_port),
                raw.sin6_flowinfo,
                raw.sin6_scope_id,
            )))
        }
        _ => None,
    }
}
