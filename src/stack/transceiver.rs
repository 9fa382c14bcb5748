//! KNXnet/IP routing transceiver: the multicast socket pair and its threads.
//!
//! The receive socket binds the routing port and joins the multicast group
//! with a short read timeout, so a timeout is an empty read and the loop
//! can notice the running flag. The transmit socket binds an ephemeral
//! port with the configured TTL and loopback disabled by default, which
//! together with the link layer's source check suppresses echoes.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, trace, warn};

use crate::error::{FrameErrorKind, KnxError, Result, TransceiverErrorKind};
use crate::protocol::constants::MAX_FRAME_SIZE;
use crate::protocol::{frame, Cemi};
use crate::settings::Settings;
use crate::stack::link::LinkDataService;
use crate::stack::transmission::TransmissionResult;

/// Receiving half: joined on the routing group.
#[derive(Debug)]
pub struct MulticastReceiver {
    socket: UdpSocket,
}

impl MulticastReceiver {
    /// Bind the routing port and join the multicast group.
    pub fn open(settings: &Settings) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, settings.multicast_port))
            .map_err(|e| KnxError::transceiver(TransceiverErrorKind::Bind, e.to_string()))?;
        socket
            .join_multicast_v4(&settings.multicast_addr, &Ipv4Addr::UNSPECIFIED)
            .map_err(|e| KnxError::transceiver(TransceiverErrorKind::Membership, e.to_string()))?;
        socket
            .set_read_timeout(Some(settings.socket_timeout))
            .map_err(|e| KnxError::transceiver(TransceiverErrorKind::SocketOption, e.to_string()))?;
        Ok(Self { socket })
    }

    /// Receive one datagram. A timeout is an empty read (`Ok(None)`), not
    /// an error; the caller loops.
    pub fn receive(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, sender)) => Ok(Some((len, sender))),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(KnxError::transceiver(TransceiverErrorKind::Io, e.to_string())),
        }
    }
}

/// Transmitting half: TTL and loopback per settings.
#[derive(Debug)]
pub struct MulticastTransmitter {
    socket: UdpSocket,
    target: SocketAddrV4,
}

impl MulticastTransmitter {
    /// Bind an ephemeral port and configure multicast options.
    pub fn open(settings: &Settings) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .map_err(|e| KnxError::transceiver(TransceiverErrorKind::Bind, e.to_string()))?;
        socket
            .set_multicast_ttl_v4(settings.ttl)
            .map_err(|e| KnxError::transceiver(TransceiverErrorKind::SocketOption, e.to_string()))?;
        socket
            .set_multicast_loop_v4(settings.loopback)
            .map_err(|e| KnxError::transceiver(TransceiverErrorKind::SocketOption, e.to_string()))?;
        Ok(Self {
            socket,
            target: SocketAddrV4::new(settings.multicast_addr, settings.multicast_port),
        })
    }

    /// Send one datagram to the routing group.
    ///
    /// # Errors
    ///
    /// `TransceiverErrorKind::PartialSend` if the OS accepted fewer bytes
    /// than given, `TransceiverErrorKind::Io` on socket failure.
    pub fn transmit(&self, data: &[u8]) -> Result<()> {
        let sent = self
            .socket
            .send_to(data, self.target)
            .map_err(|e| KnxError::transceiver(TransceiverErrorKind::Io, e.to_string()))?;
        if sent < data.len() {
            return Err(KnxError::transceiver(
                TransceiverErrorKind::PartialSend,
                format!("{sent} of {} bytes", data.len()),
            ));
        }
        Ok(())
    }
}

/// The socket pair, ready to spawn its threads.
#[derive(Debug)]
pub struct Transceiver {
    receiver: MulticastReceiver,
    transmitter: MulticastTransmitter,
}

impl Transceiver {
    /// Open both sockets. Failures here are fatal at startup.
    pub fn open(settings: &Settings) -> Result<Self> {
        Ok(Self {
            receiver: MulticastReceiver::open(settings)?,
            transmitter: MulticastTransmitter::open(settings)?,
        })
    }

    /// Spawn the receive and transmit threads. Both exit when `running`
    /// clears (the receive thread within one socket timeout, the transmit
    /// thread when the outbound queue closes).
    pub(crate) fn spawn(
        self,
        running: Arc<AtomicBool>,
        link: Arc<LinkDataService>,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        let rx_link = Arc::clone(&link);
        let rx_running = Arc::clone(&running);
        let receiver = self.receiver;
        let rx_handle = std::thread::Builder::new()
            .name("knx-rx".into())
            .spawn(move || receive_loop(&receiver, &rx_running, &rx_link))
            .expect("spawn receive thread");

        let transmitter = self.transmitter;
        let tx_handle = std::thread::Builder::new()
            .name("knx-tx".into())
            .spawn(move || transmit_loop(&transmitter, &running, &link))
            .expect("spawn transmit thread");

        (rx_handle, tx_handle)
    }
}

fn receive_loop(receiver: &MulticastReceiver, running: &AtomicBool, link: &LinkDataService) {
    let mut buf = [0u8; MAX_FRAME_SIZE];
    while running.load(Ordering::Relaxed) {
        match receiver.receive(&mut buf) {
            Ok(None) => {} // timeout, re-check the running flag
            Ok(Some((len, sender))) => match frame::decode_routing_frame(&buf[..len]) {
                Ok(cemi_bytes) => match Cemi::parse(cemi_bytes) {
                    Ok(cemi) => link.put_in_frame(cemi),
                    Err(err) => warn!("bad cEMI frame from {sender}: {err}"),
                },
                Err(KnxError::Frame(FrameErrorKind::UnsupportedServiceType)) => {
                    trace!("non-routing service from {sender} ignored");
                }
                Err(err) => warn!("bad KNXnet/IP datagram from {sender}: {err}"),
            },
            Err(err) => warn!("receive failure: {err}"),
        }
    }
    debug!("receive thread ended");
}

fn transmit_loop(transmitter: &MulticastTransmitter, running: &AtomicBool, link: &LinkDataService) {
    while let Some(transmission) = link.get_out_frame() {
        if !running.load(Ordering::Relaxed) {
            transmission.resolve(TransmissionResult::Cancelled);
            continue;
        }
        match frame::encode_routing_frame(transmission.frame()) {
            Ok(datagram) => match transmitter.transmit(&datagram) {
                // The send is the confirmation (see DESIGN.md)
                Ok(()) => transmission.resolve(TransmissionResult::Ok),
                Err(err) => {
                    warn!("transmit failure: {err}");
                    transmission.resolve(TransmissionResult::SendFailed);
                }
            },
            Err(err) => {
                warn!("frame too large for routing datagram: {err}");
                transmission.resolve(TransmissionResult::SendFailed);
            }
        }
    }
    debug!("transmit thread ended");
}
