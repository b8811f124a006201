//! Daemonization: the double fork trick and the PID file.

use std::{
	fs::{File, OpenOptions},
	io::{self, Write},
	os::unix::{fs::OpenOptionsExt, io::AsRawFd},
	path::Path,
};

/// Outcome of [`daemonize`]. The parent halves of both forks receive
/// [`Fork::Parent`] and must exit immediately; the daemon itself continues
/// with [`Fork::Child`].
pub enum Fork {
	Parent,
	Child(PidFile),
}

/// The daemon's PID file, held open and advisory-locked until the process
/// exits.
pub struct PidFile {
	_file: File,
}

/// Performs the double fork trick to run as a daemon, redirects stdio to
/// `/dev/null` and writes the PID file.
///
/// Must run before the async runtime is created; forking a process with a
/// live reactor does not survive.
pub fn daemonize(pid_file: &Path) -> io::Result<Fork> {
	// Primary fork
	if fork().map_err(|err| context("primary fork failed", err))? > 0 {
		return Ok(Fork::Parent);
	}

	if unsafe { libc::setsid() } < 0 {
		return Err(context("setsid() failed", io::Error::last_os_error()));
	}
	std::env::set_current_dir("/").map_err(|err| context("chdir(\"/\") failed", err))?;
	unsafe { libc::umask(0) };

	// Secondary fork
	if fork().map_err(|err| context("secondary fork failed", err))? > 0 {
		return Ok(Fork::Parent);
	}

	redirect_stdio()?;

	Ok(Fork::Child(write_pid_file(pid_file)?))
}

fn fork() -> io::Result<libc::pid_t> {
	match unsafe { libc::fork() } {
		-1 => Err(io::Error::last_os_error()),
		pid => Ok(pid),
	}
}

/// Redirects all standard I/O to `/dev/null`.
fn redirect_stdio() -> io::Result<()> {
	let null = OpenOptions::new()
		.read(true)
		.write(true)
		.open("/dev/null")
		.map_err(|err| context("failed to open /dev/null", err))?;

	for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
		if unsafe { libc::dup2(null.as_raw_fd(), fd) } < 0 {
			return Err(context("failed to reassign standard descriptor", io::Error::last_os_error()));
		}
	}

	Ok(())
}

/// Writes `{pid}\n`; on success the file is left open and locked.
fn write_pid_file(path: &Path) -> io::Result<PidFile> {
	let mut file = OpenOptions::new()
		.create(true)
		.truncate(true)
		.write(true)
		.mode(0o640)
		.open(path)
		.map_err(|err| context("failed to open PID file", err))?;

	// Advisory exclusive lock at offset 0, length 0
	if unsafe { libc::lockf(file.as_raw_fd(), libc::F_TLOCK, 0) } < 0 {
		return Err(context("failed to lock PID file", io::Error::last_os_error()));
	}

	writeln!(file, "{}", std::process::id()).map_err(|err| context("failed to write PID file", err))?;

	Ok(PidFile { _file: file })
}

fn context(what: &str, err: io::Error) -> io::Error {
	io::Error::new(err.kind(), format!("{what}: {err}"))
}
