use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::{Arc, Mutex, PoisonError},
};

/// Something that can put a datagram on the wire.
pub trait RtpTransport: Send + Sync {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
}

impl RtpTransport for UdpSocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }
}

/// The session object the pacer sends through.
///
/// The transport and remote address may both be absent (not yet negotiated,
/// or torn down mid-call); the pacer treats either as a failed send for the
/// current cycle and tries again on its next wake.
pub trait MediaSession: Send + Sync {
    /// SSRC stamped on outgoing packets and reported in send results.
    fn ssrc(&self) -> u32;
    fn transport(&self) -> Option<Arc<dyn RtpTransport>>;
    fn remote_address(&self) -> Option<SocketAddr>;
    fn remote_address_set(&self, addr: Option<SocketAddr>);
}

/// A [`MediaSession`] over a UDP socket.
pub struct UdpMediaSession {
    ssrc: u32,
    transport: Mutex<Option<Arc<dyn RtpTransport>>>,
    remote: Mutex<Option<SocketAddr>>,
}

impl UdpMediaSession {
    #[must_use]
    pub fn new(ssrc: u32, socket: UdpSocket, remote: Option<SocketAddr>) -> Self {
        Self::with_transport(ssrc, Some(Arc::new(socket)), remote)
    }

    #[must_use]
    pub fn with_transport(
        ssrc: u32,
        transport: Option<Arc<dyn RtpTransport>>,
        remote: Option<SocketAddr>,
    ) -> Self {
        Self {
            ssrc,
            transport: Mutex::new(transport),
            remote: Mutex::new(remote),
        }
    }

    /// Binds an ephemeral local UDP port and targets `remote`.
    pub fn bind(ssrc: u32, local: SocketAddr, remote: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        Ok(Self::new(ssrc, socket, Some(remote)))
    }

    /// Drops the transport; later sends fail with `NoTransport`.
    pub fn transport_close(&self) {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl MediaSession for UdpMediaSession {
    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn transport(&self) -> Option<Arc<dyn RtpTransport>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        *self.remote.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remote_address_set(&self, addr: Option<SocketAddr>) {
        *self.remote.lock().unwrap_or_else(PoisonError::into_inner) = addr;
    }
}
