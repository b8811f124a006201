//! Networking utilities and abstractions

use crate::errors::{InvalidPrefixLength, NetworkParseError};
use std::{cmp::Ordering, collections::BTreeMap, fmt, io, net::Ipv4Addr, str::FromStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// An IPv4 network: an address plus a CIDR prefix length.
///
/// Constructed with [`Network::new`], the address is canonicalized to the
/// network by clearing its host bits. Constructed with [`Network::with_host`],
/// the host bits are retained so that an interface's own address can be
/// recovered later through [`Network::address`].
pub struct Network {
	address: Ipv4Addr,
	prefix_length: u8,
}
impl Network {
	/// Creates a network whose low `32 - prefix_length` address bits are cleared.
	pub fn new(address: Ipv4Addr, prefix_length: u8) -> Result<Self, InvalidPrefixLength> {
		Ok(Self::with_host(address, prefix_length)?.masked())
	}

	/// Creates a network that retains the host bits of the given address.
	pub fn with_host(address: Ipv4Addr, prefix_length: u8) -> Result<Self, InvalidPrefixLength> {
		if prefix_length > 32 {
			return Err(InvalidPrefixLength(prefix_length));
		}

		Ok(Self { address, prefix_length })
	}

	/// The address as given at construction, host bits included.
	#[inline(always)]
	pub fn address(&self) -> Ipv4Addr {
		self.address
	}

	#[inline(always)]
	pub fn prefix_length(&self) -> u8 {
		self.prefix_length
	}

	pub fn masked_address(&self) -> Ipv4Addr {
		mask(self.address, self.prefix_length)
	}

	pub fn masked(&self) -> Network {
		Self {
			address: self.masked_address(),
			prefix_length: self.prefix_length,
		}
	}

	/// Returns true iff the high `prefix_length` bits of the given address
	/// equal the network's.
	pub fn contains(&self, address: Ipv4Addr) -> bool {
		mask(address, self.prefix_length) == self.masked_address()
	}
}
impl Ord for Network {
	fn cmp(&self, other: &Self) -> Ordering {
		self.masked_address()
			.cmp(&other.masked_address())
			.then_with(|| self.prefix_length.cmp(&other.prefix_length))
			.then_with(|| self.address.cmp(&other.address))
	}
}
impl PartialOrd for Network {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl fmt::Display for Network {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.address, self.prefix_length)
	}
}
impl FromStr for Network {
	type Err = NetworkParseError;

	/// Parses `a.b.c.d/len` with apply-mask semantics; a bare address is a
	/// host route (`/32`).
	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let (address, prefix_length) = match value.split_once('/') {
			Some((address, prefix)) => (address, prefix.parse::<u8>().map_err(|_| NetworkParseError::Syntax)?),
			None => (value, 32),
		};

		let address = address.parse::<Ipv4Addr>().map_err(|_| NetworkParseError::Syntax)?;
		Ok(Self::new(address, prefix_length)?)
	}
}

fn mask(address: Ipv4Addr, prefix_length: u8) -> Ipv4Addr {
	let bits = u32::MAX.checked_shl(32 - u32::from(prefix_length)).unwrap_or(0);
	Ipv4Addr::from(u32::from(address) & bits)
}

/// Maps interface names to the IPv4 networks configured on them.
///
/// Ordered by interface name; each entry lists the interface's networks in OS
/// enumeration order, host addresses retained.
pub type InterfaceAddressMap = BTreeMap<String, Vec<Network>>;

/// Builds a map of interface names to their IPv4 networks.
///
/// Non-AF_INET entries are skipped; the netmask is converted to a prefix
/// length by counting set bits.
pub fn interface_addresses() -> io::Result<InterfaceAddressMap> {
	let mut map = InterfaceAddressMap::new();

	for iface in if_addrs::get_if_addrs()? {
		if let if_addrs::IfAddr::V4(addr) = iface.addr {
			let prefix_length = u32::from(addr.netmask).count_ones() as u8;
			let network = Network::with_host(addr.ip, prefix_length)
				.map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
			map.entry(iface.name).or_insert_with(Vec::new).push(network);
		}
	}

	Ok(map)
}

/// Returns true when every one of the given interface names refers to an
/// interface that exists and carries the `IFF_UP` flag.
pub fn all_interfaces_up<'a, I>(interfaces: I) -> io::Result<bool>
where
	I: IntoIterator<Item = &'a str>,
{
	let interfaces = interfaces.into_iter().collect::<Vec<_>>();
	log::info!("Checking whether interfaces are up: {}", interfaces.join(" "));

	let probe = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;

	let mut all_up = true;
	for interface in interfaces {
		if !interface_is_up(&probe, interface)? {
			log::warn!("Required interface '{interface}' is down");
			all_up = false;
		}
	}

	Ok(all_up)
}

/// Checks the `IFF_UP` flag of one interface with a `SIOCGIFFLAGS` ioctl on
/// the given probe socket.
fn interface_is_up(probe: &socket2::Socket, name: &str) -> io::Result<bool> {
	use std::os::unix::io::AsRawFd;

	let mut request: libc::ifreq = unsafe { std::mem::zeroed() };
	if name.len() >= request.ifr_name.len() {
		return Err(io::Error::new(io::ErrorKind::InvalidInput, "interface name too long"));
	}
	for (dst, src) in request.ifr_name.iter_mut().zip(name.as_bytes()) {
		*dst = *src as libc::c_char;
	}

	let res = unsafe { libc::ioctl(probe.as_raw_fd(), libc::SIOCGIFFLAGS as _, &mut request) };
	if res < 0 {
		let err = io::Error::last_os_error();
		return match err.raw_os_error() {
			// Interface does not exist (yet?); consider it down
			Some(libc::ENODEV) => Ok(false),
			_ => Err(err),
		};
	}

	Ok(unsafe { request.ifr_ifru.ifru_flags } & libc::IFF_UP as libc::c_short != 0)
}
