//! Running git child processes with an optional timeout.
//!
//! Without a timeout this is `Command::output`. With one, stdout and stderr
//! are drained on helper threads while the parent waits, so a chatty child
//! cannot fill a pipe and deadlock against `wait_timeout`. On unix the child
//! leads its own process group so a timeout also takes down the helpers git
//! spawns (`git-remote-https`, `ssh`, `index-pack`).

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Human-readable reason for a failed command: stderr if present,
    /// otherwise stdout, otherwise the exit status.
    pub fn failure_reason(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }

        let stdout = String::from_utf8_lossy(&self.stdout);
        let stdout = stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }

        match self.status.code() {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Outcome of [`run_command`].
#[derive(Debug)]
pub enum RunOutcome {
    Completed(CommandOutput),
    TimedOut,
}

/// Run `cmd` to completion, killing it if `timeout` elapses first.
pub fn run_command(mut cmd: Command, timeout: Option<Duration>) -> io::Result<RunOutcome> {
    cmd.stdin(Stdio::null());

    let Some(timeout) = timeout else {
        let output = cmd.output()?;
        return Ok(RunOutcome::Completed(CommandOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        }));
    };

    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);
    let mut child = cmd.spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_handle = thread::spawn(move || drain(stdout));
    let stderr_handle = thread::spawn(move || drain(stderr));

    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            log::warn!("git command timed out after {:?}, killing", timeout);
            kill_tree(&mut child)?;
            child.wait()?;
            // Anything that escaped the group may still hold the pipes open;
            // the reader threads are left to finish on their own.
            drop(stdout_handle);
            drop(stderr_handle);
            return Ok(RunOutcome::TimedOut);
        }
    };

    let stdout = join_output(stdout_handle)?;
    let stderr = join_output(stderr_handle)?;

    Ok(RunOutcome::Completed(CommandOutput {
        status,
        stdout,
        stderr,
    }))
}

/// SIGKILL the child's whole process group.
#[cfg(unix)]
fn kill_tree(child: &mut Child) -> io::Result<()> {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return child.kill();
    };
    // SAFETY: kill(2) has no memory effects. The group id is the pid of a
    // child we have not reaped yet, so it cannot have been recycled.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == 0 {
        return Ok(());
    }
    log::debug!(
        "Killing process group {} failed: {}",
        pgid,
        io::Error::last_os_error()
    );
    child.kill()
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> io::Result<()> {
    child.kill()
}

fn drain<R: Read>(stream: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

fn join_output(handle: thread::JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(io::Error::other("output reader thread panicked")),
    }
}
