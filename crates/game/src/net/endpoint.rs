use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Shared handle to one UDP socket.
///
/// Clones refer to the same socket, which closes when the last clone drops.
/// Reads wait at most `read_timeout` so receive loops can check for
/// shutdown between datagrams.
#[derive(Debug, Clone)]
pub struct NetworkEndpoint {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A, read_timeout: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(read_timeout.max(MIN_READ_TIMEOUT)))?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr)
    }

    /// Waits for one datagram. `Ok(None)` means the read timed out.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((size, addr)) => Ok(Some((size, addr))),
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Whether a receive error only concerns one datagram.
///
/// On some platforms an ICMP port-unreachable for an earlier send surfaces
/// as a failed read; the socket itself is still usable.
pub fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recv_times_out_without_data() {
        let endpoint = NetworkEndpoint::bind("127.0.0.1:0", Duration::from_millis(5)).unwrap();
        let mut buf = [0u8; 16];
        assert!(endpoint.recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_send_and_receive() {
        let a = NetworkEndpoint::bind("127.0.0.1:0", Duration::from_millis(200)).unwrap();
        let b = NetworkEndpoint::bind("127.0.0.1:0", Duration::from_millis(200)).unwrap();

        a.send_to(&[6], b.local_addr()).unwrap();

        let mut buf = [0u8; 16];
        let (size, from) = b.recv_from(&mut buf).unwrap().expect("datagram");
        assert_eq!(&buf[..size], &[6]);
        assert_eq!(from, a.local_addr());
    }
}
