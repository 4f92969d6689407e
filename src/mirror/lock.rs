//! One evergit run per backup root.
//!
//! The run lock is an advisory `flock` on `{root}/.evergit.lock`. The holder
//! writes its pid into the file so a refused run can say who is in the way.
//! Only the flock decides ownership, and the kernel drops it when the
//! holder exits, even after a crash.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;

/// Result of trying to start a run on a backup root.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(RunLock),
    /// Another run holds the root. `holder` is its pid when it recorded one.
    Busy { holder: Option<u32> },
}

/// Exclusive claim on a backup root for the duration of a run.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    /// Claim the root without waiting. Missing parent directories are created.
    pub fn try_acquire(lock_path: &Path) -> io::Result<LockAttempt> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Not truncated on open: a refused run must still see the holder's pid.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() != io::ErrorKind::WouldBlock {
                return Err(e);
            }
            return Ok(LockAttempt::Busy {
                holder: read_pid(&mut file),
            });
        }

        record_pid(&mut file)?;
        log::debug!("Took run lock {}", lock_path.display());
        Ok(LockAttempt::Acquired(Self { file }))
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // Stale pids are harmless but confusing in a refusal message.
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
    }
}

fn record_pid(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}
