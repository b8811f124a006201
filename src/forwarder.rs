use crate::{
	config::MulticastEndpoint,
	errors::RuntimeError,
	net::Network,
	receiver::{PacketHandler, Receiver},
	sender::Sender,
};
use std::{
	io,
	net::{Ipv4Addr, SocketAddrV4},
	rc::Rc,
};
use tokio::{sync::mpsc, task::JoinHandle};

/// Associates an accepted source network with the sender that relays its
/// datagrams.
pub(crate) struct SourceRoute {
	pub network: Network,
	pub sender: Rc<Sender>,
}

/// A [`Receiver`] with routing attached: each accepted datagram is forwarded
/// to every sender whose source network contains its origin.
pub struct Forwarder {
	receiver: Receiver,
	routes: Vec<SourceRoute>,
}
impl Forwarder {
	pub fn new(endpoint: MulticastEndpoint) -> io::Result<Self> {
		Ok(Self {
			receiver: Receiver::new(endpoint)?,
			routes: Vec::new(),
		})
	}

	#[inline(always)]
	pub fn endpoint(&self) -> MulticastEndpoint {
		self.receiver.endpoint()
	}

	pub fn join_on_interface(&self, interface: Ipv4Addr) -> io::Result<()> {
		self.receiver.join_on_interface(interface)
	}

	/// Appends a route. Insertion order is fan-out order; duplicates are
	/// accepted and produce duplicate forwards.
	pub fn add(&mut self, network: Network, sender: Rc<Sender>) {
		self.routes.push(SourceRoute { network, sender });
	}

	pub(crate) fn routes(&self) -> &[SourceRoute] {
		&self.routes
	}

	/// Starts the receive loop, consuming the forwarder.
	pub fn start(self, fatal: mpsc::UnboundedSender<RuntimeError>) -> JoinHandle<()> {
		let Forwarder { receiver, routes } = self;
		let handler = SourceRoutes {
			endpoint: receiver.endpoint(),
			routes,
		};
		receiver.start(handler, fatal)
	}
}

/// The routing half of a running forwarder.
pub(crate) struct SourceRoutes {
	endpoint: MulticastEndpoint,
	routes: Vec<SourceRoute>,
}
impl SourceRoutes {
	/// Routes whose source network contains the origin, in insertion order.
	fn matching(&self, origin: Ipv4Addr) -> impl Iterator<Item = &SourceRoute> {
		// No fancy matching structures; route lists are fairly small
		self.routes.iter().filter(move |route| route.network.contains(origin))
	}
}
impl PacketHandler for SourceRoutes {
	fn handle_packet(&self, origin: SocketAddrV4, packet: &[u8]) {
		let mut forwarded = 0usize;
		for route in self.matching(*origin.ip()) {
			route.sender.send(packet, self.endpoint);
			forwarded += 1;
		}

		if forwarded > 0 {
			log::debug!("Datagram queued for forwarding {forwarded} times");
		} else {
			log::debug!("Datagram discarded");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::{future::Future, net::UdpSocket as StdUdpSocket, time::Duration};

	fn run_local<F: Future>(future: F) -> F::Output {
		let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
		let local = tokio::task::LocalSet::new();
		local.block_on(&runtime, future)
	}

	/// A plain socket standing in for the multicast group, so copies can be
	/// observed without multicast routing.
	fn group_stand_in() -> (StdUdpSocket, MulticastEndpoint) {
		let socket = StdUdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
		socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
		let port = socket.local_addr().unwrap().port();
		(socket, MulticastEndpoint::new(Ipv4Addr::LOCALHOST, port))
	}

	fn network(value: &str) -> Network {
		value.parse().unwrap()
	}

	fn origin(value: &str) -> SocketAddrV4 {
		SocketAddrV4::new(value.parse().unwrap(), 37000)
	}

	#[test]
	fn matching_is_in_insertion_order_with_duplicates() {
		run_local(async {
			let (fatal, _fatal_rx) = mpsc::unbounded_channel();
			let near = Rc::new(Sender::new(Ipv4Addr::LOCALHOST, fatal.clone()).unwrap());
			let far = Rc::new(Sender::new(Ipv4Addr::LOCALHOST, fatal).unwrap());

			let routes = SourceRoutes {
				endpoint: MulticastEndpoint::new(Ipv4Addr::new(239, 255, 255, 250), 1900),
				routes: vec![
					SourceRoute {
						network: network("10.0.0.0/8"),
						sender: near.clone(),
					},
					SourceRoute {
						network: network("0.0.0.0/0"),
						sender: far.clone(),
					},
					SourceRoute {
						network: network("10.0.1.0/24"),
						sender: near.clone(),
					},
				],
			};

			let matched = routes.matching("10.0.1.42".parse().unwrap()).collect::<Vec<_>>();
			assert_eq!(matched.len(), 3);
			assert!(Rc::ptr_eq(&matched[0].sender, &near));
			assert!(Rc::ptr_eq(&matched[1].sender, &far));
			assert!(Rc::ptr_eq(&matched[2].sender, &near));

			let matched = routes.matching("172.16.0.4".parse().unwrap()).collect::<Vec<_>>();
			assert_eq!(matched.len(), 1);
			assert!(Rc::ptr_eq(&matched[0].sender, &far));
		});
	}

	#[test]
	fn forwards_one_copy_per_matching_route() {
		run_local(async {
			let (fatal, _fatal_rx) = mpsc::unbounded_channel();
			let (group, endpoint) = group_stand_in();

			let sender = Rc::new(Sender::new(Ipv4Addr::LOCALHOST, fatal).unwrap());
			let routes = SourceRoutes {
				endpoint,
				routes: vec![
					SourceRoute {
						network: network("10.0.0.0/8"),
						sender: sender.clone(),
					},
					SourceRoute {
						network: network("0.0.0.0/0"),
						sender: sender.clone(),
					},
					SourceRoute {
						network: network("192.168.0.0/16"),
						sender: sender.clone(),
					},
				],
			};

			routes.handle_packet(origin("10.0.1.42"), b"hello");
			tokio::time::sleep(Duration::from_millis(100)).await;

			// Two routes contain the origin, so exactly two copies went out
			let mut buffer = [0u8; 64];
			for _ in 0..2 {
				let (length, _) = group.recv_from(&mut buffer).unwrap();
				assert_eq!(&buffer[..length], b"hello");
			}
			group.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
			assert!(group.recv_from(&mut buffer).is_err());
		});
	}

	#[test]
	fn discards_datagrams_from_unmatched_origins() {
		run_local(async {
			let (fatal, _fatal_rx) = mpsc::unbounded_channel();
			let (group, endpoint) = group_stand_in();

			let sender = Rc::new(Sender::new(Ipv4Addr::LOCALHOST, fatal).unwrap());
			let routes = SourceRoutes {
				endpoint,
				routes: vec![SourceRoute {
					network: network("10.0.1.0/25"),
					sender,
				}],
			};

			routes.handle_packet(origin("10.0.1.200"), b"dropped");
			routes.handle_packet(origin("10.0.1.10"), b"kept");
			tokio::time::sleep(Duration::from_millis(100)).await;

			let mut buffer = [0u8; 64];
			let (length, _) = group.recv_from(&mut buffer).unwrap();
			assert_eq!(&buffer[..length], b"kept");

			group.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
			assert!(group.recv_from(&mut buffer).is_err());
		});
	}
}
