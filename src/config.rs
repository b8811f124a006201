//! Configuration model and file loading.
//!
//! The forwarding plane consumes a validated [`Configuration`]; this module
//! also provides the loader that produces one from a TOML file:
//!
//! ```toml
//! [[service]]
//! name = "ssdp"              # well-known alias, or explicit group + port:
//! # group = "239.255.255.250"
//! # port = 1900
//!
//! [[service.rule]]
//! from = "eth0"
//! to = "eth1"
//! networks = ["10.0.1.0/24"] # optional; empty accepts the source interface's networks
//! ```

use crate::{errors::ConfigError, net::Network, MDNS_PORT, MDNS_V4_IP, SSDP_PORT, SSDP_V4_IP};
use serde::Deserialize;
use std::{collections::BTreeSet, fmt, net::Ipv4Addr, path::Path};

/// Services resolvable by name in the configuration file.
const WELL_KNOWN_SERVICES: &[(&str, Ipv4Addr, u16)] = &[("mdns", MDNS_V4_IP, MDNS_PORT), ("ssdp", SSDP_V4_IP, SSDP_PORT)];

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A multicast group address and UDP port.
///
/// Identifies one class of traffic, handled by exactly one receiver no matter
/// how many rules reference it.
pub struct MulticastEndpoint {
	pub group: Ipv4Addr,
	pub port: u16,
}
impl MulticastEndpoint {
	pub fn new(group: Ipv4Addr, port: u16) -> Self {
		Self { group, port }
	}
}
impl fmt::Display for MulticastEndpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.group, self.port)
	}
}

#[derive(Debug)]
/// Declares that datagrams arriving on `from` are relayed out of `to`,
/// optionally restricted to the given source networks.
pub struct ForwardingRule {
	pub from: String,
	pub to: String,
	/// Accepted source networks, in declaration order. Empty means "accept
	/// from the networks the source interface itself is on".
	pub networks: Vec<Network>,
}

#[derive(Debug)]
pub struct ServiceConfiguration {
	pub endpoint: MulticastEndpoint,
	pub rules: Vec<ForwardingRule>,
}
impl ServiceConfiguration {
	/// Resolves a well-known service name (`mdns`, `ssdp`).
	pub fn from_name(name: &str) -> Result<Self, ConfigError> {
		WELL_KNOWN_SERVICES
			.iter()
			.find(|(known, ..)| *known == name)
			.map(|&(_, group, port)| Self {
				endpoint: MulticastEndpoint::new(group, port),
				rules: Vec::new(),
			})
			.ok_or_else(|| ConfigError::UnknownService(name.to_owned()))
	}

	pub fn from_endpoint(group: Ipv4Addr, port: u16) -> Result<Self, ConfigError> {
		if port == 0 {
			return Err(ConfigError::ZeroPort);
		}
		if !group.is_multicast() {
			return Err(ConfigError::NotMulticast(group));
		}

		Ok(Self {
			endpoint: MulticastEndpoint::new(group, port),
			rules: Vec::new(),
		})
	}
}

#[derive(Debug, Default)]
/// The validated configuration: an ordered list of services, each with its
/// ordered forwarding rules. Immutable for the lifetime of one router.
pub struct Configuration {
	pub services: Vec<ServiceConfiguration>,
}
impl Configuration {
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_owned(),
			source,
		})?;
		Self::from_toml(&contents)
	}

	pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
		let raw = toml::from_str::<RawConfiguration>(contents).map_err(ConfigError::Parse)?;

		let mut services = Vec::with_capacity(raw.services.len());
		for service in raw.services {
			services.push(service.validate()?);
		}

		Ok(Self { services })
	}

	/// The set of interface names referenced by any forwarding rule.
	pub fn interfaces(&self) -> BTreeSet<&str> {
		let mut interfaces = BTreeSet::new();
		for service in &self.services {
			for rule in &service.rules {
				interfaces.insert(rule.from.as_str());
				interfaces.insert(rule.to.as_str());
			}
		}
		interfaces
	}
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfiguration {
	#[serde(default, rename = "service")]
	services: Vec<RawService>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
	name: Option<String>,
	group: Option<String>,
	port: Option<u16>,
	#[serde(default, rename = "rule")]
	rules: Vec<RawRule>,
}
impl RawService {
	fn validate(self) -> Result<ServiceConfiguration, ConfigError> {
		let mut service = match (self.name, self.group, self.port) {
			(Some(name), None, None) => ServiceConfiguration::from_name(&name)?,
			(None, Some(group), Some(port)) => {
				let group = group.parse::<Ipv4Addr>().map_err(|_| ConfigError::InvalidGroupAddress(group.clone()))?;
				ServiceConfiguration::from_endpoint(group, port)?
			}
			(Some(_), _, _) => return Err(ConfigError::AmbiguousEndpoint),
			_ => return Err(ConfigError::MissingEndpoint),
		};

		for rule in self.rules {
			service.rules.push(rule.validate()?);
		}

		Ok(service)
	}
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
	from: String,
	to: String,
	#[serde(default)]
	networks: Vec<String>,
}
impl RawRule {
	fn validate(self) -> Result<ForwardingRule, ConfigError> {
		check_interface_name(&self.from)?;
		check_interface_name(&self.to)?;

		let networks = self
			.networks
			.into_iter()
			.map(|value| {
				value
					.parse::<Network>()
					.map_err(|source| ConfigError::InvalidNetwork { value, source })
			})
			.collect::<Result<Vec<_>, _>>()?;

		Ok(ForwardingRule {
			from: self.from,
			to: self.to,
			networks,
		})
	}
}

/// Interface names must fit an `ifreq`, terminator included.
fn check_interface_name(name: &str) -> Result<(), ConfigError> {
	if name.len() >= libc::IFNAMSIZ {
		return Err(ConfigError::InterfaceNameTooLong(name.to_owned()));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn well_known_service() {
		let configuration = Configuration::from_toml(
			r#"
			[[service]]
			name = "ssdp"

			[[service.rule]]
			from = "eth0"
			to = "eth1"
			"#,
		)
		.unwrap();

		assert_eq!(configuration.services.len(), 1);
		let service = &configuration.services[0];
		assert_eq!(service.endpoint, MulticastEndpoint::new(SSDP_V4_IP, SSDP_PORT));
		assert_eq!(service.rules.len(), 1);
		assert_eq!(service.rules[0].from, "eth0");
		assert_eq!(service.rules[0].to, "eth1");
		assert!(service.rules[0].networks.is_empty());
	}

	#[test]
	fn explicit_endpoint_and_networks() {
		let configuration = Configuration::from_toml(
			r#"
			[[service]]
			group = "239.1.2.3"
			port = 9999

			[[service.rule]]
			from = "eth0"
			to = "eth1"
			networks = ["10.0.1.5/24", "192.168.0.0/16"]
			"#,
		)
		.unwrap();

		let service = &configuration.services[0];
		assert_eq!(service.endpoint.to_string(), "239.1.2.3:9999");

		// Host bits are masked away by the loader
		let networks = &service.rules[0].networks;
		assert_eq!(networks.len(), 2);
		assert_eq!(networks[0].to_string(), "10.0.1.0/24");
		assert_eq!(networks[1].to_string(), "192.168.0.0/16");
	}

	#[test]
	fn unknown_service_is_rejected() {
		let err = Configuration::from_toml("[[service]]\nname = \"nope\"\n").unwrap_err();
		assert!(matches!(err, ConfigError::UnknownService(name) if name == "nope"));
	}

	#[test]
	fn zero_port_is_rejected() {
		let err = Configuration::from_toml("[[service]]\ngroup = \"239.1.2.3\"\nport = 0\n").unwrap_err();
		assert!(matches!(err, ConfigError::ZeroPort));
	}

	#[test]
	fn non_multicast_group_is_rejected() {
		let err = Configuration::from_toml("[[service]]\ngroup = \"10.1.2.3\"\nport = 9999\n").unwrap_err();
		assert!(matches!(err, ConfigError::NotMulticast(_)));
	}

	#[test]
	fn endpoint_must_be_exactly_one_of_name_or_group_port() {
		let err = Configuration::from_toml("[[service]]\nname = \"mdns\"\nport = 5353\n").unwrap_err();
		assert!(matches!(err, ConfigError::AmbiguousEndpoint));

		let err = Configuration::from_toml("[[service]]\ngroup = \"224.0.0.251\"\n").unwrap_err();
		assert!(matches!(err, ConfigError::MissingEndpoint));

		let err = Configuration::from_toml("[[service]]\n").unwrap_err();
		assert!(matches!(err, ConfigError::MissingEndpoint));
	}

	#[test]
	fn over_long_interface_name_is_rejected() {
		let err = Configuration::from_toml(
			r#"
			[[service]]
			name = "mdns"

			[[service.rule]]
			from = "interface-name-way-too-long"
			to = "eth1"
			"#,
		)
		.unwrap_err();
		assert!(matches!(err, ConfigError::InterfaceNameTooLong(_)));
	}

	#[test]
	fn invalid_network_is_rejected() {
		let err = Configuration::from_toml(
			r#"
			[[service]]
			name = "mdns"

			[[service.rule]]
			from = "eth0"
			to = "eth1"
			networks = ["10.0.1.0/33"]
			"#,
		)
		.unwrap_err();
		assert!(matches!(err, ConfigError::InvalidNetwork { .. }));
	}

	#[test]
	fn unknown_keys_are_rejected() {
		assert!(Configuration::from_toml("[[service]]\nname = \"mdns\"\nttl = 4\n").is_err());
	}

	#[test]
	fn interfaces_is_the_union_over_all_rules() {
		let configuration = Configuration::from_toml(
			r#"
			[[service]]
			name = "mdns"

			[[service.rule]]
			from = "eth0"
			to = "eth1"

			[[service.rule]]
			from = "eth2"
			to = "eth1"

			[[service]]
			name = "ssdp"

			[[service.rule]]
			from = "eth0"
			to = "eth3"
			"#,
		)
		.unwrap();

		let interfaces = configuration.interfaces();
		assert_eq!(interfaces.into_iter().collect::<Vec<_>>(), vec!["eth0", "eth1", "eth2", "eth3"]);
	}
}
