use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, TcpListener};

/// Returns a TCP port that was free at the time of the call.
///
/// The listener is closed before returning, so the port is not reserved;
/// another process may claim it before the browser binds it.
pub fn get_free_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv6Addr::UNSPECIFIED, 0))
        .or_else(|_| TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)))?;

    Ok(listener.local_addr()?.port())
}
