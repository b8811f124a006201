use crate::config::MulticastEndpoint;
use std::{io, net::Ipv4Addr, path::PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("invalid IPv4 prefix length: {0}")]
pub struct InvalidPrefixLength(pub u8);

#[derive(Debug, Error)]
pub enum NetworkParseError {
	#[error("invalid IPv4 network")]
	Syntax,

	#[error("{0}")]
	Prefix(#[from] InvalidPrefixLength),
}

/// Errors raised while loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("error reading configuration file '{path}': {source}")]
	Read { path: PathBuf, source: io::Error },

	#[error("configuration parse error: {0}")]
	Parse(toml::de::Error),

	#[error("unknown service '{0}'")]
	UnknownService(String),

	#[error("service must specify either a well-known name or a group address and port")]
	MissingEndpoint,

	#[error("service cannot specify both a well-known name and an explicit endpoint")]
	AmbiguousEndpoint,

	#[error("port cannot be zero")]
	ZeroPort,

	#[error("'{0}' is not an IPv4 multicast address")]
	NotMulticast(Ipv4Addr),

	#[error("invalid group address '{0}'")]
	InvalidGroupAddress(String),

	#[error("interface name exceeds maximum length: {0}")]
	InterfaceNameTooLong(String),

	#[error("invalid network '{value}': {source}")]
	InvalidNetwork { value: String, source: NetworkParseError },
}

/// Errors raised while (re)building the forwarding plane.
///
/// All of these are recoverable: the supervisor logs them and schedules a
/// retry. In test mode they are the printed failure.
#[derive(Debug, Error)]
pub enum BuildError {
	#[error("one or more required interfaces are down")]
	InterfacesDown,

	#[error("failed to check interface state: {0}")]
	Readiness(io::Error),

	#[error("failed to query network interface addresses: {0}")]
	EnumerateInterfaces(io::Error),

	#[error("failed to identify IPv4 network for interface {0}")]
	InterfaceNotFound(String),

	#[error("failed to set up receiver for {endpoint}: {source}")]
	ReceiverSetup { endpoint: MulticastEndpoint, source: io::Error },

	#[error("failed to join {endpoint} on interface {interface}: {source}")]
	Join {
		endpoint: MulticastEndpoint,
		interface: Ipv4Addr,
		source: io::Error,
	},

	#[error("failed to set up sender on interface {interface}: {source}")]
	SenderSetup { interface: Ipv4Addr, source: io::Error },
}

/// Fatal I/O errors on the data path. The router's continued operation is
/// untrustworthy after one of these; the event loop reports it and the
/// process exits nonzero.
#[derive(Debug, Error)]
pub enum RuntimeError {
	#[error("receive from {endpoint} failed: {source}")]
	Receive {
		endpoint: MulticastEndpoint,
		source: io::Error,
	},

	#[error("send to {interface} failed: {source}")]
	Send {
		interface: Ipv4Addr,
		source: io::Error,
	},
}

/// Errors that terminate [`Supervisor::run`](crate::Supervisor::run).
#[derive(Debug, Error)]
pub enum RunError {
	#[error(transparent)]
	Runtime(#[from] RuntimeError),

	#[error("I/O error: {0}")]
	Io(#[from] io::Error),
}
