use crate::{config::MulticastEndpoint, errors::RuntimeError};
use std::{
	io,
	net::{Ipv4Addr, SocketAddrV4},
};
use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle};

/// An owned copy of one datagram, queued for transmission.
struct QueueItem {
	payload: Vec<u8>,
	endpoint: MulticastEndpoint,
}

/// Emits datagrams as multicast on one outbound interface.
///
/// One sender exists per outbound interface address; several forwarders may
/// share it. Queued datagrams leave the socket strictly in order: a single
/// drain task awaits each send before starting the next, so at most one send
/// is ever in flight.
pub struct Sender {
	interface: Ipv4Addr,
	queue: mpsc::UnboundedSender<QueueItem>,
	task: JoinHandle<()>,
}
impl Sender {
	/// Opens the outbound socket and spawns the drain task.
	///
	/// Outgoing multicast defaults to TTL=1 with loopback to the sending
	/// host; the TTL is kept (this is a link-local forwarder), the loopback
	/// is disabled, and the outgoing interface is pinned to the given
	/// address.
	///
	/// Must be called from within a [`tokio::task::LocalSet`].
	pub fn new(interface: Ipv4Addr, fatal: mpsc::UnboundedSender<RuntimeError>) -> io::Result<Self> {
		let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
		socket.set_multicast_loop_v4(false)?;
		socket.set_multicast_if_v4(&interface)?;
		socket.set_nonblocking(true)?;

		let socket = UdpSocket::from_std(socket.into())?;

		let (queue, rx) = mpsc::unbounded_channel();
		let task = tokio::task::spawn_local(Self::drain(socket, interface, rx, fatal));

		Ok(Self { interface, queue, task })
	}

	#[inline(always)]
	pub fn interface(&self) -> Ipv4Addr {
		self.interface
	}

	/// Copies the datagram into an owned queue item and appends it to the
	/// FIFO; the drain task picks it up as soon as any earlier sends have
	/// completed.
	pub fn send(&self, data: &[u8], endpoint: MulticastEndpoint) {
		let item = QueueItem {
			payload: data.to_vec(),
			endpoint,
		};

		// The drain task only ends after a fatal send error, and the whole
		// plane is torn down right after; late datagrams are dropped.
		self.queue.send(item).ok();
	}

	async fn drain(
		socket: UdpSocket,
		interface: Ipv4Addr,
		mut queue: mpsc::UnboundedReceiver<QueueItem>,
		fatal: mpsc::UnboundedSender<RuntimeError>,
	) {
		while let Some(QueueItem { payload, endpoint }) = queue.recv().await {
			log::debug!("Sending datagram of {} bytes to {endpoint} from interface {interface}", payload.len());

			match socket.send_to(&payload, SocketAddrV4::new(endpoint.group, endpoint.port)).await {
				// UDP datagram semantics: there is no partial retransmission,
				// so a short send is consumed all the same
				Ok(sent) if sent < payload.len() => {
					log::warn!("datagram truncated: only sent {sent} out of {} bytes", payload.len());
				}
				Ok(_) => {}
				Err(source) => {
					fatal.send(RuntimeError::Send { interface, source }).ok();
					break;
				}
			}
		}
	}
}
impl Drop for Sender {
	fn drop(&mut self) {
		self.task.abort();
	}
}
