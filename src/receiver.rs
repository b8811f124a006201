use crate::{config::MulticastEndpoint, errors::RuntimeError};
use std::{
	io,
	net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4},
};
use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle};

/// IPv4 headers take at least 20 bytes
const IPV4_MINIMUM_HEADER_SIZE: usize = 20;
/// UDP headers have a fixed length of 8 bytes
const UDP_HEADER_SIZE: usize = 8;
/// The maximum size of IPv4 datagrams is limited by the 16-bit length field
/// in the IPv4 header
pub const MAX_IPV4_UDP_DATAGRAM_SIZE: usize = u16::MAX as usize - IPV4_MINIMUM_HEADER_SIZE - UDP_HEADER_SIZE;

/// Capability invoked for every nonempty datagram a [`Receiver`] reads.
///
/// Stands in for subclassing: a receiver is given its packet handler at
/// start and never changes it.
pub trait PacketHandler {
	fn handle_packet(&self, origin: SocketAddrV4, packet: &[u8]);
}
impl<F> PacketHandler for F
where
	F: Fn(SocketAddrV4, &[u8]),
{
	fn handle_packet(&self, origin: SocketAddrV4, packet: &[u8]) {
		self(origin, packet)
	}
}

/// Listens for datagrams addressed to one multicast endpoint.
///
/// The socket binds `0.0.0.0:port`; group memberships are added explicitly
/// per inbound interface with [`Receiver::join_on_interface`].
pub struct Receiver {
	socket: UdpSocket,
	endpoint: MulticastEndpoint,
}
impl Receiver {
	/// Opens the receive socket with address reuse enabled, so other
	/// processes listening on the same group and port are left undisturbed.
	pub fn new(endpoint: MulticastEndpoint) -> io::Result<Self> {
		let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
		socket.set_reuse_address(true)?;
		socket.set_reuse_port(true)?;

		socket.bind(&socket2::SockAddr::from(SocketAddr::new(
			IpAddr::V4(Ipv4Addr::UNSPECIFIED),
			endpoint.port,
		)))?;
		socket.set_nonblocking(true)?;

		Ok(Self {
			socket: UdpSocket::from_std(socket.into())?,
			endpoint,
		})
	}

	#[inline(always)]
	pub fn endpoint(&self) -> MulticastEndpoint {
		self.endpoint
	}

	/// Adds a membership for the endpoint's group, scoped to the given
	/// interface address.
	///
	/// Memberships per socket cap at the OS's IP_MAX_MEMBERSHIPS; exceeding
	/// the ceiling surfaces as the join error.
	pub fn join_on_interface(&self, interface: Ipv4Addr) -> io::Result<()> {
		self.socket.join_multicast_v4(self.endpoint.group, interface)
	}

	/// Starts the receive loop on the current [`tokio::task::LocalSet`],
	/// consuming the receiver.
	pub fn start<H>(self, handler: H, fatal: mpsc::UnboundedSender<RuntimeError>) -> JoinHandle<()>
	where
		H: PacketHandler + 'static,
	{
		tokio::task::spawn_local(self.run(handler, fatal))
	}

	async fn run<H>(self, handler: H, fatal: mpsc::UnboundedSender<RuntimeError>)
	where
		H: PacketHandler,
	{
		let mut buffer = vec![0u8; MAX_IPV4_UDP_DATAGRAM_SIZE];

		loop {
			match self.socket.recv_from(&mut buffer).await {
				Ok((length, origin)) => {
					// Length zero is tolerated but skipped
					if length == 0 {
						continue;
					}

					// An IPv4 socket only ever reports IPv4 origins
					let SocketAddr::V4(origin) = origin else { continue };

					log::debug!("Received datagram of {length} bytes from {origin}");
					handler.handle_packet(origin, &buffer[..length]);
				}
				Err(source) => {
					fatal
						.send(RuntimeError::Receive {
							endpoint: self.endpoint,
							source,
						})
						.ok();
					return;
				}
			}
		}
	}
}
