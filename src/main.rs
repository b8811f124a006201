use clap::Parser;
use mcv4fwdd::{config::Configuration, daemon, Supervisor};
use std::{path::PathBuf, process::ExitCode};

#[derive(Parser)]
#[command(name = "mcv4fwdd", about = "IPv4 Multicast Forwarding Daemon")]
struct Cli {
	/// Path to the configuration file
	#[arg(short = 'c', value_name = "CONFIGURATION_FILE", default_value = "/etc/mcv4fwdd.conf")]
	config: PathBuf,

	/// Run in foreground; do not fork
	#[arg(short = 'f')]
	foreground: bool,

	/// Exit after testing the configuration
	#[arg(short = 'n')]
	test: bool,

	/// Path to the PID file (must be absolute)
	#[arg(short = 'p', value_name = "PID_FILE", default_value = "/var/run/mcv4fwdd.pid")]
	pid_file: PathBuf,
}

fn main() -> ExitCode {
	let cli = match Cli::try_parse() {
		Ok(cli) => cli,
		Err(err) => {
			// -h prints to stdout and exits 0; anything else is a usage error
			let failure = err.use_stderr();
			err.print().ok();
			return if failure { ExitCode::FAILURE } else { ExitCode::SUCCESS };
		}
	};

	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	let configuration = match Configuration::load(&cli.config) {
		Ok(configuration) => configuration,
		Err(err) => {
			eprintln!("{err}");
			return ExitCode::FAILURE;
		}
	};

	if cli.test {
		return match Supervisor::test(&configuration) {
			Ok(()) => {
				println!("Test succeeded.");
				ExitCode::SUCCESS
			}
			Err(err) => {
				eprintln!("{err}");
				eprintln!("Test failed.");
				ExitCode::FAILURE
			}
		};
	}

	// The PID file is created after chdir("/")
	if !cli.pid_file.is_absolute() {
		eprintln!("mcv4fwdd: PID file path must be absolute");
		return ExitCode::FAILURE;
	}

	let _pid_file = if cli.foreground {
		None
	} else {
		match daemon::daemonize(&cli.pid_file) {
			Ok(daemon::Fork::Parent) => return ExitCode::SUCCESS,
			Ok(daemon::Fork::Child(pid_file)) => Some(pid_file),
			Err(err) => {
				log::error!("{err}");
				return ExitCode::FAILURE;
			}
		}
	};

	match Supervisor::run(configuration) {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			log::error!("crashed: {err}");
			ExitCode::FAILURE
		}
	}
}
