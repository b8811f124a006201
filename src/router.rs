use crate::{
	config::MulticastEndpoint,
	errors::{BuildError, RuntimeError},
	forwarder::Forwarder,
	net::Network,
	sender::Sender,
};
use std::{
	collections::{btree_map::Entry, BTreeMap},
	net::Ipv4Addr,
	rc::Rc,
};
use tokio::{sync::mpsc, task::JoinHandle};

/// The forwarding plane under construction.
///
/// One forwarder exists per multicast endpoint, as one receiver can join its
/// group on several interfaces (at most IP_MAX_MEMBERSHIPS); one sender
/// exists per outgoing interface address, shared between however many
/// forwarders relay to it.
pub struct Router {
	forwarders: BTreeMap<MulticastEndpoint, Forwarder>,
	senders: BTreeMap<Ipv4Addr, Rc<Sender>>,
	fatal: mpsc::UnboundedSender<RuntimeError>,
}
impl Router {
	pub fn new(fatal: mpsc::UnboundedSender<RuntimeError>) -> Self {
		Self {
			forwarders: BTreeMap::new(),
			senders: BTreeMap::new(),
			fatal,
		}
	}

	/// Wires one resolved forwarding rule into the plane.
	///
	/// The forwarder for the endpoint and the sender for the outbound
	/// interface are created on first use; one accepted network becomes one
	/// source route each.
	pub fn add_rule(
		&mut self,
		endpoint: MulticastEndpoint,
		from_interface: Ipv4Addr,
		accepted_networks: &[Network],
		to_interface: Ipv4Addr,
	) -> Result<(), BuildError> {
		let forwarder = match self.forwarders.entry(endpoint) {
			Entry::Occupied(entry) => entry.into_mut(),
			Entry::Vacant(entry) => entry.insert(
				Forwarder::new(endpoint).map_err(|source| BuildError::ReceiverSetup { endpoint, source })?,
			),
		};

		forwarder.join_on_interface(from_interface).map_err(|source| BuildError::Join {
			endpoint,
			interface: from_interface,
			source,
		})?;

		let sender = match self.senders.entry(to_interface) {
			Entry::Occupied(entry) => entry.into_mut(),
			Entry::Vacant(entry) => entry.insert(Rc::new(
				Sender::new(to_interface, self.fatal.clone()).map_err(|source| BuildError::SenderSetup {
					interface: to_interface,
					source,
				})?,
			)),
		};

		for network in accepted_networks {
			forwarder.add(*network, sender.clone());
		}

		Ok(())
	}

	pub fn forwarders(&self) -> &BTreeMap<MulticastEndpoint, Forwarder> {
		&self.forwarders
	}

	pub fn senders(&self) -> &BTreeMap<Ipv4Addr, Rc<Sender>> {
		&self.senders
	}

	/// Starts every forwarder, consuming the router into its running form.
	///
	/// Senders have no start step; the first queued datagram activates them.
	pub fn start(self) -> RunningRouter {
		let Router { forwarders, senders, fatal } = self;

		log::debug!("Router configuration:");
		for interface in senders.keys() {
			log::debug!("Sender on {interface}");
		}

		let tasks = forwarders
			.into_iter()
			.map(|(endpoint, forwarder)| {
				log::debug!("Forwarder for {endpoint}; {} routes", forwarder.routes().len());
				forwarder.start(fatal.clone())
			})
			.collect();

		RunningRouter {
			tasks,
			_senders: senders.into_values().collect(),
		}
	}
}

/// The running forwarding plane.
///
/// Dropping it aborts every receive loop and every sender drain task; the
/// supervisor does exactly that before each rebuild.
pub struct RunningRouter {
	tasks: Vec<JoinHandle<()>>,
	// Keeps the senders (and their drain tasks) alive until teardown
	_senders: Vec<Rc<Sender>>,
}
impl Drop for RunningRouter {
	fn drop(&mut self) {
		for task in &self.tasks {
			task.abort();
		}
	}
}
