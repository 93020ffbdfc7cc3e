//! PTY attachments using portable-pty.
//!
//! An attachment is a pseudo-terminal running either an "attach to host"
//! command or a bare login shell. Output is read on a dedicated thread and
//! delivered as [`PtyEvent`]s; the final event is always `Exit`.

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vc_core::{VcError, VcResult};

const READ_CHUNK: usize = 4096;

/// What to run inside a new PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Inherited variables to drop before `env` is applied.
    pub env_remove: Vec<String>,
    pub cols: u16,
    pub rows: u16,
}

/// Something that happened on the PTY's output side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    Data(Vec<u8>),
    Exit(i32),
}

/// Control side of a running PTY process.
pub trait PtyProcess: Send {
    fn write(&mut self, data: &[u8]) -> VcResult<()>;
    fn resize(&mut self, cols: u16, rows: u16) -> VcResult<()>;
    fn kill(&mut self) -> VcResult<()>;
    fn pid(&self) -> Option<u32>;
}

/// A freshly spawned PTY: its control handle and its event stream.
pub struct SpawnedPty {
    pub process: Box<dyn PtyProcess>,
    pub events: mpsc::UnboundedReceiver<PtyEvent>,
}

/// Factory for PTY processes.
pub trait PtySpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> VcResult<SpawnedPty>;
}

/// [`PtySpawner`] backed by the operating system's PTY implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtySpawner;

impl PtySpawner for NativePtySpawner {
    fn spawn(&self, request: &SpawnRequest) -> VcResult<SpawnedPty> {
        let (handle, events) = PtyHandle::spawn(request)?;
        Ok(SpawnedPty {
            process: Box::new(handle),
            events,
        })
    }
}

/// A managed PTY instance.
pub struct PtyHandle {
    /// The master for resize operations.
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl PtyHandle {
    /// Spawn `request` in a new PTY and start its reader thread.
    pub fn spawn(request: &SpawnRequest) -> VcResult<(Self, mpsc::UnboundedReceiver<PtyEvent>)> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(size(request.cols, request.rows))
            .map_err(|e| VcError::Launch(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.cwd(cwd);
        }
        for key in &request.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            VcError::Launch(format!("failed to spawn {}: {e}", request.program))
        })?;
        // The reader only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| VcError::Pty(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| VcError::Pty(format!("failed to take PTY writer: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name(format!("pty-reader-{}", pid.unwrap_or_default()))
            .spawn(move || {
                let mut buf = [0u8; READ_CHUNK];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(PtyEvent::Data(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        // EIO once the child side is gone.
                        Err(e) => {
                            debug!(error = %e, "PTY read ended");
                            break;
                        }
                    }
                }
                let code = match child.wait() {
                    Ok(status) => i32::try_from(status.exit_code()).unwrap_or(-1),
                    Err(e) => {
                        warn!(error = %e, "PTY wait failed");
                        -1
                    }
                };
                info!(code, pid = ?pid, "PTY child exited");
                let _ = tx.send(PtyEvent::Exit(code));
            })
            .map_err(|e| VcError::Pty(format!("failed to start PTY reader: {e}")))?;

        info!(
            program = %request.program,
            cols = request.cols,
            rows = request.rows,
            pid = ?pid,
            "PTY spawned"
        );

        Ok((
            Self {
                master: pair.master,
                writer,
                killer,
                pid,
            },
            rx,
        ))
    }
}

impl PtyProcess for PtyHandle {
    fn write(&mut self, data: &[u8]) -> VcResult<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> VcResult<()> {
        self.master
            .resize(size(cols, rows))
            .map_err(|e| VcError::Pty(format!("PTY resize failed: {e}")))?;
        debug!(cols, rows, "PTY resized");
        Ok(())
    }

    fn kill(&mut self) -> VcResult<()> {
        self.killer
            .kill()
            .map_err(|e| VcError::Pty(format!("kill failed: {e}")))
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

fn size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}
