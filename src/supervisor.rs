use crate::{
	config::{Configuration, MulticastEndpoint},
	errors::{BuildError, RunError, RuntimeError},
	net::{self, InterfaceAddressMap, Network},
	router::{Router, RunningRouter},
};
use std::{net::Ipv4Addr, time::Duration};
use tokio::{
	signal::unix::{signal, SignalKind},
	sync::mpsc,
	time::Instant,
};

/// Delay before a failed build attempt is retried.
const RESET_DELAY: Duration = Duration::from_secs(5);

/// Process-lifetime controller for the forwarding plane.
///
/// Rebuilds the router whenever the interface topology is not ready yet,
/// retrying every five seconds, and runs it until SIGINT/SIGTERM or a fatal
/// I/O error on the data path.
pub struct Supervisor {
	configuration: Configuration,
}
impl Supervisor {
	pub fn new(configuration: Configuration) -> Self {
		Self { configuration }
	}

	/// Runs the daemon event loop until shutdown.
	///
	/// Everything — receivers, senders, the reset timer and the signal
	/// waits — runs on one current-thread runtime, so no two callbacks ever
	/// execute concurrently.
	pub fn run(configuration: Configuration) -> Result<(), RunError> {
		let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
		let local = tokio::task::LocalSet::new();
		local.block_on(&runtime, Self::new(configuration).event_loop())
	}

	/// Performs a single build attempt without opening any forwarding
	/// sockets: readiness check, interface enumeration, rule resolution.
	pub fn test(configuration: &Configuration) -> Result<(), BuildError> {
		if !net::all_interfaces_up(configuration.interfaces()).map_err(BuildError::Readiness)? {
			return Err(BuildError::InterfacesDown);
		}

		let interface_addresses = net::interface_addresses().map_err(BuildError::EnumerateInterfaces)?;
		resolve_rules(configuration, &interface_addresses).map(|_| ())
	}

	async fn event_loop(self) -> Result<(), RunError> {
		// Cleanly exit on SIGINT (CTRL-C) and SIGTERM
		let mut sigint = signal(SignalKind::interrupt())?;
		let mut sigterm = signal(SignalKind::terminate())?;

		let (fatal, mut fatal_rx) = mpsc::unbounded_channel();

		let retry = tokio::time::sleep(RESET_DELAY);
		tokio::pin!(retry);

		let mut router: Option<RunningRouter> = None;
		let mut waiting = !self.build(&mut router, &fatal);
		if waiting {
			retry.as_mut().reset(Instant::now() + RESET_DELAY);
		}

		loop {
			tokio::select! {
				biased;

				_ = sigint.recv() => break,
				_ = sigterm.recv() => break,

				Some(err) = fatal_rx.recv() => return Err(err.into()),

				// The guard keeps a canceled timer from restarting anything;
				// it is re-armed only after another failed attempt
				_ = retry.as_mut(), if waiting => {
					waiting = !self.build(&mut router, &fatal);
					if waiting {
						retry.as_mut().reset(Instant::now() + RESET_DELAY);
					}
				}
			}
		}

		log::info!("shutting down");
		Ok(())
	}

	/// One build attempt. Any previous plane is torn down first; returns
	/// whether the plane is now running.
	fn build(&self, router: &mut Option<RunningRouter>, fatal: &mpsc::UnboundedSender<RuntimeError>) -> bool {
		*router = None;

		match self.try_build(fatal) {
			Ok(running) => {
				*router = Some(running);
				true
			}
			// Already reported per interface by the readiness check
			Err(BuildError::InterfacesDown) => false,
			Err(err) => {
				log::error!("router configuration failed: {err}");
				false
			}
		}
	}

	fn try_build(&self, fatal: &mpsc::UnboundedSender<RuntimeError>) -> Result<RunningRouter, BuildError> {
		if !net::all_interfaces_up(self.configuration.interfaces()).map_err(BuildError::Readiness)? {
			return Err(BuildError::InterfacesDown);
		}

		// All required interfaces should be up at this point
		let interface_addresses = net::interface_addresses().map_err(BuildError::EnumerateInterfaces)?;

		let mut router = Router::new(fatal.clone());
		for rule in resolve_rules(&self.configuration, &interface_addresses)? {
			router.add_rule(rule.endpoint, rule.from, &rule.networks, rule.to)?;
		}

		Ok(router.start())
	}
}

/// A forwarding rule with its interfaces resolved to concrete addresses.
#[derive(Debug)]
pub(crate) struct ResolvedRule {
	pub endpoint: MulticastEndpoint,
	pub from: Ipv4Addr,
	pub networks: Vec<Network>,
	pub to: Ipv4Addr,
}

/// Translates the configuration into concrete rules against the current
/// interface-address map.
pub(crate) fn resolve_rules(
	configuration: &Configuration,
	interface_addresses: &InterfaceAddressMap,
) -> Result<Vec<ResolvedRule>, BuildError> {
	let mut resolved = Vec::new();

	for service in &configuration.services {
		for rule in &service.rules {
			let from_networks = lookup(interface_addresses, &rule.from, "joining receiver")?;
			let to_networks = lookup(interface_addresses, &rule.to, "configuring sender")?;

			// Explicit source networks win; an empty list accepts from all
			// networks on which the source interface has addresses (can
			// contain duplicates)
			let networks = if rule.networks.is_empty() {
				from_networks.iter().map(Network::masked).collect()
			} else {
				rule.networks.clone()
			};

			resolved.push(ResolvedRule {
				endpoint: service.endpoint,
				from: from_networks[0].address(),
				networks,
				to: to_networks[0].address(),
			});
		}
	}

	Ok(resolved)
}

/// Finds the addresses for the given interface. The first one in enumeration
/// order is used, with a warning naming it when there are more.
fn lookup<'a>(
	interface_addresses: &'a InterfaceAddressMap,
	interface: &str,
	purpose: &str,
) -> Result<&'a [Network], BuildError> {
	let networks = interface_addresses
		.get(interface)
		.filter(|networks| !networks.is_empty())
		.ok_or_else(|| BuildError::InterfaceNotFound(interface.to_owned()))?;

	if networks.len() > 1 {
		log::warn!(
			"interface {interface} has multiple IPv4 addresses; {purpose} on {}",
			networks[0]
		);
	}

	Ok(networks)
}
