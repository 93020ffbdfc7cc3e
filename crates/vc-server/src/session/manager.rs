//! Session lifecycle management.
//!
//! Tracks every session record, moves it through
//! `created -> attached -> detached -> (removed)`, and routes PTY output
//! into the replay buffer and out to subscribers.
//!
//! All registry mutations happen under one async mutex. Each attachment has
//! a single pump task applying its PTY events in order under that lock, so
//! output is buffered and broadcast in emission order and a subscriber's
//! replay is always delivered before any live chunk.

use super::env::{login_shell, scrubbed_env, terminal_env};
use super::host::{HostLaunch, SessionHost};
use super::pty::{PtyEvent, PtyProcess, PtySpawner, SpawnRequest, SpawnedPty};
use super::ring_buffer::{RingBuffer, DEFAULT_BUFFER_CHUNKS};
use super::sink::{SinkRef, SubscriberSet};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use vc_core::{ServerMessage, SessionInfo, SessionKind, SessionState, VcError, VcResult};

pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 40;
pub const DEFAULT_HOST_PREFIX: &str = "vc-";

/// Exit code reported when a session goes away without a PTY exit status.
const UNKNOWN_EXIT: i32 = -1;

static NEXT_ATTACHMENT_ID: AtomicU64 = AtomicU64::new(1);

/// What to do with a hosted session's attachment once nobody is watching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdlePolicy {
    /// Keep streaming into the replay buffer.
    #[default]
    KeepStreaming,
    /// Detach from the host when the last subscriber leaves.
    Detach,
}

impl FromStr for IdlePolicy {
    type Err = VcError;

    fn from_str(s: &str) -> VcResult<Self> {
        match s {
            "keep-streaming" => Ok(Self::KeepStreaming),
            "detach" => Ok(Self::Detach),
            other => Err(VcError::Config(format!(
                "unknown idle policy {other:?} (expected keep-streaming or detach)"
            ))),
        }
    }
}

/// Tunables for the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub buffer_chunks: usize,
    pub cols: u16,
    pub rows: u16,
    pub host_prefix: String,
    /// Program started inside every new host session.
    pub agent_command: String,
    /// Login shell override; `$SHELL` otherwise.
    pub shell: Option<String>,
    /// Search path exported to every spawned process.
    pub path: String,
    pub idle_policy: IdlePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_chunks: DEFAULT_BUFFER_CHUNKS,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            host_prefix: DEFAULT_HOST_PREFIX.to_string(),
            agent_command: "claude".to_string(),
            shell: None,
            path: std::env::var("PATH").unwrap_or_default(),
            idle_policy: IdlePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Backing {
    Hosted { host_name: String },
    Standalone,
}

/// The live PTY bridging a session to the manager.
struct Attachment {
    id: u64,
    process: Box<dyn PtyProcess>,
}

/// One registry entry.
struct Session {
    id: String,
    backing: Backing,
    cwd: Option<PathBuf>,
    attachment: Option<Attachment>,
    subscribers: SubscriberSet,
    buffer: RingBuffer,
    cols: u16,
    rows: u16,
    ever_attached: bool,
}

impl Session {
    fn new(id: &str, backing: Backing, cwd: Option<PathBuf>, config: &SessionConfig) -> Self {
        Self {
            id: id.to_string(),
            backing,
            cwd,
            attachment: None,
            subscribers: SubscriberSet::new(),
            buffer: RingBuffer::new(config.buffer_chunks),
            cols: config.cols,
            rows: config.rows,
            ever_attached: false,
        }
    }

    fn host_name(&self) -> Option<&str> {
        match &self.backing {
            Backing::Hosted { host_name } => Some(host_name),
            Backing::Standalone => None,
        }
    }

    fn is_standalone(&self) -> bool {
        self.backing == Backing::Standalone
    }

    fn is_current(&self, attachment_id: u64) -> bool {
        self.attachment.as_ref().map(|a| a.id) == Some(attachment_id)
    }

    fn state(&self) -> SessionState {
        if self.attachment.is_some() {
            SessionState::Attached
        } else if self.ever_attached {
            SessionState::Detached
        } else {
            SessionState::Created
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            kind: if self.is_standalone() {
                SessionKind::Standalone
            } else {
                SessionKind::Hosted
            },
            host_name: self.host_name().map(str::to_string),
            state: self.state(),
            attachment_id: self.attachment.as_ref().map(|a| a.id),
            pid: self.attachment.as_ref().and_then(|a| a.process.pid()),
            subscribers: self.subscribers.len(),
            buffered_chunks: self.buffer.len(),
            cols: self.cols,
            rows: self.rows,
            cwd: self.cwd.as_ref().map(|p| p.display().to_string()),
        }
    }

    fn kill_attachment(&mut self) {
        if let Some(mut attachment) = self.attachment.take() {
            if let Err(e) = attachment.process.kill() {
                debug!(session_id = %self.id, error = %e, "attachment already gone");
            }
        }
    }

    /// Tell subscribers the session is gone, then stop its attachment.
    ///
    /// Called on records leaving the registry for any reason other than
    /// their own PTY exit, whose `Exit` event then finds no record.
    fn close(&mut self) {
        self.subscribers.broadcast(&ServerMessage::Exit {
            session_id: self.id.clone(),
            exit_code: UNKNOWN_EXIT,
        });
        self.kill_attachment();
    }
}

/// State shared between the manager and its pump tasks.
struct Shared {
    sessions: Mutex<HashMap<String, Session>>,
    host: Arc<dyn SessionHost>,
    idle_policy: IdlePolicy,
}

impl Shared {
    async fn on_data(&self, id: &str, attachment_id: u64, data: Vec<u8>) {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        if !session.is_current(attachment_id) {
            return;
        }

        session.buffer.push(data.clone());
        let pruned = session.subscribers.broadcast(&ServerMessage::Output {
            session_id: id.to_string(),
            data,
        });
        if pruned > 0 {
            debug!(session_id = %id, pruned, "pruned closed subscribers");
            self.apply_idle_policy(session);
        }
    }

    async fn on_exit(&self, id: &str, attachment_id: u64, exit_code: i32) {
        let exit = ServerMessage::Exit {
            session_id: id.to_string(),
            exit_code,
        };

        let host_name = {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(id) else {
                return;
            };
            if !session.is_current(attachment_id) {
                return;
            }
            session.attachment = None;

            let Some(host_name) = session.host_name().map(str::to_string) else {
                session.subscribers.broadcast(&exit);
                sessions.remove(id);
                info!(session_id = %id, exit_code, "shell exited");
                return;
            };

            session.subscribers.broadcast(&ServerMessage::Detached {
                session_id: id.to_string(),
                exit_code,
            });
            host_name
        };

        // A third party may kill the host right after this probe; the next
        // health sweep corrects a stale "detached".
        if self.host_exists(&host_name).await {
            info!(session_id = %id, host = %host_name, exit_code, "detached, host still running");
            return;
        }

        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        // Re-attached or replaced while the probe ran.
        if session.attachment.is_some() || session.host_name() != Some(host_name.as_str()) {
            return;
        }
        session.subscribers.broadcast(&exit);
        sessions.remove(id);
        info!(session_id = %id, host = %host_name, exit_code, "host session gone");
    }

    /// Run a multiplexer call on the blocking pool. Host commands spawn and
    /// wait on a child process, so they never run on a runtime worker or
    /// under the registry lock.
    async fn on_host<T, F>(&self, call: F) -> VcResult<T>
    where
        F: FnOnce(&dyn SessionHost) -> VcResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let host = self.host.clone();
        tokio::task::spawn_blocking(move || call(host.as_ref()))
            .await
            .map_err(|e| VcError::Other(format!("host task join error: {e}")))?
    }

    async fn host_exists(&self, name: &str) -> bool {
        let name = name.to_string();
        match self.on_host(move |host| Ok(host.exists(&name))).await {
            Ok(alive) => alive,
            Err(e) => {
                warn!(error = %e, "host probe failed");
                false
            }
        }
    }

    /// Detach a hosted session nobody is watching, if configured to.
    fn apply_idle_policy(&self, session: &mut Session) {
        if self.idle_policy != IdlePolicy::Detach || !session.subscribers.is_empty() {
            return;
        }
        if session.is_standalone() {
            return;
        }
        if let Some(attachment) = session.attachment.as_mut() {
            info!(session_id = %session.id, "no subscribers left, detaching");
            if let Err(e) = attachment.process.write(self.host.detach_sequence()) {
                warn!(session_id = %session.id, error = %e, "idle detach failed");
            }
        }
    }
}

/// Apply one attachment's PTY events in order until it exits.
async fn pump(
    shared: Arc<Shared>,
    id: String,
    attachment_id: u64,
    mut events: mpsc::UnboundedReceiver<PtyEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PtyEvent::Data(data) => shared.on_data(&id, attachment_id, data).await,
            PtyEvent::Exit(code) => {
                shared.on_exit(&id, attachment_id, code).await;
                return;
            }
        }
    }
    // Reader vanished without reporting a status.
    shared.on_exit(&id, attachment_id, UNKNOWN_EXIT).await;
}

/// Owns every session and the processes behind them.
pub struct SessionManager {
    shared: Arc<Shared>,
    spawner: Arc<dyn PtySpawner>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a new session manager.
    pub fn new(
        config: SessionConfig,
        host: Arc<dyn SessionHost>,
        spawner: Arc<dyn PtySpawner>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                sessions: Mutex::new(HashMap::new()),
                host,
                idle_policy: config.idle_policy,
            }),
            spawner,
            config,
        }
    }

    /// Default host session name: the prefix plus the first 8 chars of the id.
    pub fn host_name_for(&self, id: &str) -> String {
        let short: String = id.chars().take(8).collect();
        format!("{}{short}", self.config.host_prefix)
    }

    /// Start a new host session running the agent in `cwd`.
    ///
    /// Nothing is attached yet; call [`attach`](Self::attach) or
    /// [`subscribe`](Self::subscribe) to start streaming.
    pub async fn create(
        &self,
        id: &str,
        cwd: &Path,
        args: &[String],
        host_name: Option<&str>,
    ) -> VcResult<SessionInfo> {
        let host_name = host_name
            .map(str::to_string)
            .unwrap_or_else(|| self.host_name_for(id));

        let launch_name = host_name.clone();
        let launch_cwd = cwd.to_path_buf();
        let command = self.config.agent_command.clone();
        let args = args.to_vec();
        let (cols, rows) = (self.config.cols, self.config.rows);
        let path = self.config.path.clone();
        self.shared
            .on_host(move |host| {
                host.create(&HostLaunch {
                    name: &launch_name,
                    cwd: &launch_cwd,
                    command: &command,
                    args: &args,
                    cols,
                    rows,
                    path: &path,
                })
            })
            .await?;

        let session = Session::new(
            id,
            Backing::Hosted {
                host_name: host_name.clone(),
            },
            Some(cwd.to_path_buf()),
            &self.config,
        );
        let info = session.info();

        let mut sessions = self.shared.sessions.lock().await;
        if let Some(mut old) = sessions.insert(id.to_string(), session) {
            old.close();
            warn!(session_id = %id, "replaced existing session record");
        }
        info!(session_id = %id, host = %host_name, "session created");
        Ok(info)
    }

    /// Adopt a host session that is already running (e.g. after a restart).
    pub async fn register(&self, id: &str, host_name: &str) -> SessionInfo {
        let session = Session::new(
            id,
            Backing::Hosted {
                host_name: host_name.to_string(),
            },
            None,
            &self.config,
        );
        let info = session.info();

        let mut sessions = self.shared.sessions.lock().await;
        if let Some(mut old) = sessions.insert(id.to_string(), session) {
            old.close();
            warn!(session_id = %id, "replaced existing session record");
        }
        info!(session_id = %id, host = %host_name, "session registered");
        info
    }

    /// Ensure a PTY attachment is live. Returns `None` for unknown sessions.
    ///
    /// Attaching an already-attached session is a no-op.
    pub async fn attach(&self, id: &str) -> VcResult<Option<SessionInfo>> {
        let mut sessions = self.shared.sessions.lock().await;
        let Some(session) = sessions.get_mut(id) else {
            return Ok(None);
        };
        self.attach_locked(session)?;
        Ok(Some(session.info()))
    }

    fn attach_locked(&self, session: &mut Session) -> VcResult<()> {
        if session.attachment.is_some() {
            return Ok(());
        }
        let Some(host_name) = session.host_name().map(str::to_string) else {
            // Standalone records are removed as soon as their shell exits.
            return Err(VcError::Pty(format!("shell {} is not running", session.id)));
        };

        let request = SpawnRequest {
            program: login_shell(self.config.shell.as_deref()),
            args: vec![
                "-l".to_string(),
                "-c".to_string(),
                self.shared.host.attach_command(&host_name),
            ],
            cwd: session.cwd.clone(),
            env: terminal_env(&self.config.path),
            env_remove: scrubbed_env(),
            cols: session.cols,
            rows: session.rows,
        };
        let spawned = self.spawner.spawn(&request)?;
        let attachment_id = self.install(session, spawned);
        info!(session_id = %session.id, host = %host_name, attachment_id, "attached");
        Ok(())
    }

    fn install(&self, session: &mut Session, spawned: SpawnedPty) -> u64 {
        let attachment_id = NEXT_ATTACHMENT_ID.fetch_add(1, Ordering::Relaxed);
        session.attachment = Some(Attachment {
            id: attachment_id,
            process: spawned.process,
        });
        session.ever_attached = true;
        tokio::spawn(pump(
            self.shared.clone(),
            session.id.clone(),
            attachment_id,
            spawned.events,
        ));
        attachment_id
    }

    /// Ask the host to drop the current attachment. Nothing is killed.
    pub async fn detach(&self, id: &str) -> bool {
        let mut sessions = self.shared.sessions.lock().await;
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        if session.is_standalone() {
            return false;
        }
        let Some(attachment) = session.attachment.as_mut() else {
            return false;
        };
        match attachment.process.write(self.shared.host.detach_sequence()) {
            Ok(()) => {
                debug!(session_id = %id, "detach requested");
                true
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "detach write failed");
                false
            }
        }
    }

    /// Forward input to the attachment. `false` if not attached.
    pub async fn write(&self, id: &str, data: &[u8]) -> bool {
        let mut sessions = self.shared.sessions.lock().await;
        let Some(attachment) = sessions.get_mut(id).and_then(|s| s.attachment.as_mut()) else {
            return false;
        };
        match attachment.process.write(data) {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = %id, error = %e, "PTY write failed");
                false
            }
        }
    }

    /// Resize the attachment. `false` if not attached.
    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> bool {
        let mut sessions = self.shared.sessions.lock().await;
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        let Some(attachment) = session.attachment.as_mut() else {
            return false;
        };
        match attachment.process.resize(cols, rows) {
            Ok(()) => {
                session.cols = cols;
                session.rows = rows;
                true
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "PTY resize failed");
                false
            }
        }
    }

    /// Terminate the host and the attachment, then drop the record.
    ///
    /// Returns whether a record existed. Already-dead processes are ignored.
    pub async fn kill(&self, id: &str) -> bool {
        let mut sessions = self.shared.sessions.lock().await;
        let Some(mut session) = sessions.remove(id) else {
            return false;
        };
        drop(sessions);

        session.close();
        if let Some(host_name) = session.host_name().map(str::to_string) {
            let name = host_name.clone();
            if let Err(e) = self.shared.on_host(move |host| host.kill(&name)).await {
                debug!(session_id = %id, host = %host_name, error = %e, "host already gone");
            }
        }
        info!(session_id = %id, "session killed");
        true
    }

    /// Whether the session's host (or, for shells, its process) is running.
    pub async fn is_alive(&self, id: &str) -> bool {
        let host_name = {
            let sessions = self.shared.sessions.lock().await;
            match sessions.get(id) {
                Some(session) => match session.host_name() {
                    Some(host_name) => host_name.to_string(),
                    None => return session.attachment.is_some(),
                },
                None => return false,
            }
        };
        self.shared.host_exists(&host_name).await
    }

    /// Add a subscriber, attaching first if needed.
    ///
    /// A new subscriber receives the buffered backlog as one
    /// `buffer_replay` message before any live output.
    pub async fn subscribe(&self, id: &str, sink: SinkRef) -> bool {
        let mut sessions = self.shared.sessions.lock().await;
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        if let Err(e) = self.attach_locked(session) {
            warn!(session_id = %id, error = %e, "attach on subscribe failed");
            return false;
        }

        if session.subscribers.insert(sink.clone()) && !session.buffer.is_empty() {
            sink.send(&ServerMessage::BufferReplay {
                session_id: id.to_string(),
                data: session.buffer.concat(),
            });
        }
        debug!(session_id = %id, subscribers = session.subscribers.len(), "subscribed");
        true
    }

    /// Remove a subscriber from one session.
    pub async fn unsubscribe(&self, id: &str, sink: &SinkRef) -> bool {
        let mut sessions = self.shared.sessions.lock().await;
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        let removed = session.subscribers.remove(sink);
        if removed {
            self.shared.apply_idle_policy(session);
        }
        removed
    }

    /// Remove a subscriber from every session. Returns how many it left.
    pub async fn unsubscribe_all(&self, sink: &SinkRef) -> usize {
        let mut sessions = self.shared.sessions.lock().await;
        let mut count = 0;
        for session in sessions.values_mut() {
            if session.subscribers.remove(sink) {
                count += 1;
                self.shared.apply_idle_policy(session);
            }
        }
        count
    }

    /// Spawn a standalone login shell. Returns the existing record if `id`
    /// is already registered.
    pub async fn create_shell(&self, id: &str, cwd: Option<&Path>) -> VcResult<SessionInfo> {
        let mut sessions = self.shared.sessions.lock().await;
        if let Some(existing) = sessions.get(id) {
            return Ok(existing.info());
        }

        let cwd = cwd
            .map(Path::to_path_buf)
            .unwrap_or_else(super::env::home_or_root);
        let request = SpawnRequest {
            program: login_shell(self.config.shell.as_deref()),
            args: vec!["-l".to_string()],
            cwd: Some(cwd.clone()),
            env: terminal_env(&self.config.path),
            env_remove: scrubbed_env(),
            cols: self.config.cols,
            rows: self.config.rows,
        };
        let spawned = self.spawner.spawn(&request)?;

        let mut session = Session::new(id, Backing::Standalone, Some(cwd), &self.config);
        let attachment_id = self.install(&mut session, spawned);
        let info = session.info();
        sessions.insert(id.to_string(), session);
        info!(session_id = %id, attachment_id, "shell created");
        Ok(info)
    }

    /// Kill and remove a standalone shell. Refuses hosted sessions.
    pub async fn close_shell(&self, id: &str) -> bool {
        let mut sessions = self.shared.sessions.lock().await;
        match sessions.get(id) {
            Some(session) if session.is_standalone() => {}
            Some(_) => {
                warn!(session_id = %id, "close_shell called on a hosted session");
                return false;
            }
            None => return false,
        }
        if let Some(mut session) = sessions.remove(id) {
            session.close();
        }
        info!(session_id = %id, "shell closed");
        true
    }

    /// Snapshot of every standalone shell.
    pub async fn list_shells(&self) -> Vec<SessionInfo> {
        let sessions = self.shared.sessions.lock().await;
        sessions
            .values()
            .filter(|s| s.is_standalone())
            .map(Session::info)
            .collect()
    }

    /// Snapshot of every session.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.shared.sessions.lock().await;
        sessions.values().map(Session::info).collect()
    }

    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        let sessions = self.shared.sessions.lock().await;
        sessions.get(id).map(Session::info)
    }

    /// Drop detached hosted sessions whose host has disappeared.
    ///
    /// Hosts are probed without holding the registry lock. Returns the IDs
    /// of sessions that were removed.
    pub async fn reap(&self) -> Vec<String> {
        let candidates: Vec<(String, String)> = {
            let sessions = self.shared.sessions.lock().await;
            sessions
                .iter()
                .filter(|(_, session)| session.attachment.is_none())
                .filter_map(|(id, session)| {
                    session.host_name().map(|h| (id.clone(), h.to_string()))
                })
                .collect()
        };
        if candidates.is_empty() {
            return Vec::new();
        }

        let names: Vec<String> = candidates.iter().map(|(_, h)| h.clone()).collect();
        let gone: HashSet<String> = match self
            .shared
            .on_host(move |host| Ok(names.into_iter().filter(|n| !host.exists(n)).collect()))
            .await
        {
            Ok(gone) => gone,
            Err(e) => {
                warn!(error = %e, "health sweep failed");
                return Vec::new();
            }
        };

        let mut sessions = self.shared.sessions.lock().await;
        let mut removed = Vec::new();
        for (id, host_name) in candidates {
            if !gone.contains(&host_name) {
                continue;
            }
            let still_stale = sessions.get(&id).is_some_and(|session| {
                session.attachment.is_none() && session.host_name() == Some(host_name.as_str())
            });
            if !still_stale {
                continue;
            }
            if let Some(mut session) = sessions.remove(&id) {
                session.close();
                warn!(session_id = %id, host = %host_name, "host session vanished");
                removed.push(id);
            }
        }

        if !removed.is_empty() {
            debug!(count = removed.len(), "health sweep removed sessions");
        }
        removed
    }

    /// Kill every attachment and standalone shell. Host sessions keep
    /// running so they can be re-registered later.
    pub async fn shutdown(&self) -> usize {
        let mut sessions = self.shared.sessions.lock().await;
        let count = sessions.len();
        for session in sessions.values_mut() {
            session.kill_attachment();
        }
        sessions.clear();
        info!(count, "session manager shut down");
        count
    }

    /// Get the number of registered sessions.
    pub async fn count(&self) -> usize {
        self.shared.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::sink::ChannelSink;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeHost {
        alive: StdMutex<HashSet<String>>,
        created: StdMutex<Vec<String>>,
        killed: StdMutex<Vec<String>>,
        fail_create: bool,
    }

    impl FakeHost {
        fn set_alive(&self, name: &str, alive: bool) {
            let mut set = self.alive.lock().unwrap();
            if alive {
                set.insert(name.to_string());
            } else {
                set.remove(name);
            }
        }
    }

    impl SessionHost for FakeHost {
        fn create(&self, launch: &HostLaunch<'_>) -> VcResult<()> {
            if self.fail_create {
                return Err(VcError::Launch(format!(
                    "failed to spawn tmux for host session {}: No such file or directory",
                    launch.name
                )));
            }
            self.created.lock().unwrap().push(launch.name.to_string());
            self.set_alive(launch.name, true);
            Ok(())
        }

        fn exists(&self, name: &str) -> bool {
            self.alive.lock().unwrap().contains(name)
        }

        fn kill(&self, name: &str) -> VcResult<()> {
            self.killed.lock().unwrap().push(name.to_string());
            if self.alive.lock().unwrap().remove(name) {
                Ok(())
            } else {
                Err(VcError::Host(format!("can't find session: {name}")))
            }
        }

        fn attach_command(&self, name: &str) -> String {
            format!("tmux attach-session -t ={name}")
        }

        fn detach_sequence(&self) -> &[u8] {
            b"\x02d"
        }
    }

    #[derive(Default)]
    struct ProcState {
        written: StdMutex<Vec<u8>>,
        size: StdMutex<Option<(u16, u16)>>,
        killed: AtomicBool,
    }

    struct FakeProcess(Arc<ProcState>);

    impl PtyProcess for FakeProcess {
        fn write(&mut self, data: &[u8]) -> VcResult<()> {
            self.0.written.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        fn resize(&mut self, cols: u16, rows: u16) -> VcResult<()> {
            *self.0.size.lock().unwrap() = Some((cols, rows));
            Ok(())
        }

        fn kill(&mut self) -> VcResult<()> {
            self.0.killed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn pid(&self) -> Option<u32> {
            Some(4242)
        }
    }

    struct Spawned {
        request: SpawnRequest,
        events: mpsc::UnboundedSender<PtyEvent>,
        state: Arc<ProcState>,
    }

    #[derive(Default)]
    struct FakeSpawner {
        spawned: StdMutex<Vec<Spawned>>,
        fail: AtomicBool,
    }

    impl FakeSpawner {
        fn count(&self) -> usize {
            self.spawned.lock().unwrap().len()
        }

        fn emit(&self, index: usize, event: PtyEvent) {
            let spawned = self.spawned.lock().unwrap();
            spawned[index].events.send(event).unwrap();
        }

        fn request(&self, index: usize) -> SpawnRequest {
            self.spawned.lock().unwrap()[index].request.clone()
        }

        fn state(&self, index: usize) -> Arc<ProcState> {
            self.spawned.lock().unwrap()[index].state.clone()
        }
    }

    impl PtySpawner for FakeSpawner {
        fn spawn(&self, request: &SpawnRequest) -> VcResult<SpawnedPty> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(VcError::Launch("failed to spawn /bin/zsh: not found".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let state = Arc::new(ProcState::default());
            self.spawned.lock().unwrap().push(Spawned {
                request: request.clone(),
                events: tx,
                state: state.clone(),
            });
            Ok(SpawnedPty {
                process: Box::new(FakeProcess(state)),
                events: rx,
            })
        }
    }

    struct Harness {
        manager: SessionManager,
        host: Arc<FakeHost>,
        spawner: Arc<FakeSpawner>,
    }

    fn harness_with(config: SessionConfig) -> Harness {
        let host = Arc::new(FakeHost::default());
        let spawner = Arc::new(FakeSpawner::default());
        let manager = SessionManager::new(config, host.clone(), spawner.clone());
        Harness {
            manager,
            host,
            spawner,
        }
    }

    fn harness() -> Harness {
        harness_with(SessionConfig {
            shell: Some("/bin/zsh".into()),
            path: "/usr/bin:/opt/tools/bin".into(),
            ..SessionConfig::default()
        })
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("sink channel closed")
    }

    /// Distinct one-character chunk per index.
    fn chunk(i: u32) -> Vec<u8> {
        char::from_u32(0x4E00 + i).unwrap().to_string().into_bytes()
    }

    async fn buffer_of(manager: &SessionManager, id: &str) -> Vec<Vec<u8>> {
        let sessions = manager.shared.sessions.lock().await;
        sessions[id].buffer.iter().map(<[u8]>::to_vec).collect()
    }

    #[tokio::test]
    async fn default_host_name_uses_prefix_and_first_eight_chars() {
        let h = harness();
        assert_eq!(h.manager.host_name_for("0123456789abcdef"), "vc-01234567");
        assert_eq!(h.manager.host_name_for("s1"), "vc-s1");

        let info = h
            .manager
            .create("abcdefghijk", Path::new("/work"), &[], None)
            .await
            .unwrap();
        assert_eq!(info.host_name.as_deref(), Some("vc-abcdefgh"));
        assert_eq!(info.state, SessionState::Created);
        assert_eq!(h.spawner.count(), 0);
    }

    #[tokio::test]
    async fn attach_is_idempotent() {
        let h = harness();
        h.manager
            .create(
                "s1",
                Path::new("/work"),
                &["--resume".to_string()],
                Some("vc-s1abcde"),
            )
            .await
            .unwrap();
        assert_eq!(*h.host.created.lock().unwrap(), vec!["vc-s1abcde".to_string()]);

        let first = h.manager.attach("s1").await.unwrap().unwrap();
        let second = h.manager.attach("s1").await.unwrap().unwrap();
        assert_eq!(first.attachment_id, second.attachment_id);
        assert!(first.attachment_id.is_some());
        assert_eq!(second.state, SessionState::Attached);
        assert_eq!(h.spawner.count(), 1);

        let req = h.spawner.request(0);
        assert_eq!(req.program, "/bin/zsh");
        assert_eq!(
            req.args,
            vec!["-l", "-c", "tmux attach-session -t =vc-s1abcde"]
        );
        assert_eq!((req.cols, req.rows), (120, 40));
        assert!(req.env.contains(&("COLORTERM".into(), "truecolor".into())));
        assert!(req
            .env
            .contains(&("PATH".into(), "/usr/bin:/opt/tools/bin".into())));
    }

    #[tokio::test]
    async fn attach_unknown_session_is_none() {
        let h = harness();
        assert!(h.manager.attach("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn buffer_eviction_and_replay_scenario() {
        let h = harness();
        h.manager
            .create("s1", Path::new("/work"), &[], Some("vc-s1abcde"))
            .await
            .unwrap();
        h.manager.attach("s1").await.unwrap();

        let (c1, mut rx1) = ChannelSink::new();
        assert!(h.manager.subscribe("s1", c1).await);

        for i in 0..1200 {
            h.spawner.emit(0, PtyEvent::Data(chunk(i)));
        }
        for i in 0..1200 {
            assert_eq!(
                next(&mut rx1).await,
                ServerMessage::Output {
                    session_id: "s1".into(),
                    data: chunk(i),
                }
            );
        }

        let buffered = buffer_of(&h.manager, "s1").await;
        let expected: Vec<Vec<u8>> = (200..1200).map(chunk).collect();
        assert_eq!(buffered, expected);

        let (c2, mut rx2) = ChannelSink::new();
        assert!(h.manager.subscribe("s1", c2).await);
        let (session_id, data) = match next(&mut rx2).await {
            ServerMessage::BufferReplay { session_id, data } => (session_id, data),
            other => panic!("expected buffer replay first, got {other:?}"),
        };
        assert_eq!(session_id, "s1");
        assert_eq!(data, expected.concat());
        let text = String::from_utf8(data).unwrap();
        for i in 0..200 {
            let old = String::from_utf8(chunk(i)).unwrap();
            assert!(!text.contains(&old), "chunk {i} leaked into replay");
        }

        // Live output follows the replay.
        h.spawner.emit(0, PtyEvent::Data(b"live".to_vec()));
        assert_eq!(
            next(&mut rx2).await,
            ServerMessage::Output {
                session_id: "s1".into(),
                data: b"live".to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn subscribe_attaches_lazily_and_skips_empty_replay() {
        let h = harness();
        h.manager.register("r1", "vc-r1").await;
        assert_eq!(h.spawner.count(), 0);

        let (c1, mut rx1) = ChannelSink::new();
        assert!(h.manager.subscribe("r1", c1).await);
        assert_eq!(h.spawner.count(), 1);

        h.spawner.emit(0, PtyEvent::Data(b"first".to_vec()));
        assert!(matches!(next(&mut rx1).await, ServerMessage::Output { .. }));
    }

    #[tokio::test]
    async fn subscribe_unknown_session_fails() {
        let h = harness();
        let (c1, _rx1) = ChannelSink::new();
        assert!(!h.manager.subscribe("ghost", c1).await);
    }

    #[tokio::test]
    async fn pty_exit_with_live_host_detaches() {
        let h = harness();
        h.manager
            .create("s1", Path::new("/work"), &[], Some("vc-s1abcde"))
            .await
            .unwrap();
        let (c1, mut rx1) = ChannelSink::new();
        h.manager.subscribe("s1", c1).await;
        h.spawner.emit(0, PtyEvent::Data(b"hello".to_vec()));
        next(&mut rx1).await;

        h.spawner.emit(0, PtyEvent::Exit(0));
        assert_eq!(
            next(&mut rx1).await,
            ServerMessage::Detached {
                session_id: "s1".into(),
                exit_code: 0,
            }
        );

        let info = h.manager.get("s1").await.unwrap();
        assert_eq!(info.state, SessionState::Detached);
        assert_eq!(info.attachment_id, None);
        assert!(!h.manager.write("s1", b"x").await);

        let again = h.manager.attach("s1").await.unwrap().unwrap();
        assert_eq!(h.spawner.count(), 2);
        assert_eq!(again.state, SessionState::Attached);
        assert!(again.attachment_id.is_some());
        assert_eq!(buffer_of(&h.manager, "s1").await, vec![b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn pty_exit_with_dead_host_removes_record() {
        let h = harness();
        h.manager
            .create("s1", Path::new("/work"), &[], Some("vc-s1abcde"))
            .await
            .unwrap();
        let (c1, mut rx1) = ChannelSink::new();
        let (c2, mut rx2) = ChannelSink::new();
        h.manager.subscribe("s1", c1).await;
        h.manager.subscribe("s1", c2).await;

        h.host.set_alive("vc-s1abcde", false);
        h.spawner.emit(0, PtyEvent::Exit(1));

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(
                next(rx).await,
                ServerMessage::Detached {
                    session_id: "s1".into(),
                    exit_code: 1,
                }
            );
            assert_eq!(
                next(rx).await,
                ServerMessage::Exit {
                    session_id: "s1".into(),
                    exit_code: 1,
                }
            );
        }
        assert!(h.manager.get("s1").await.is_none());
        assert!(!h.manager.is_alive("s1").await);
    }

    #[tokio::test]
    async fn stale_attachment_events_are_ignored() {
        let h = harness();
        h.manager.register("s1", "vc-s1").await;
        let first = h.manager.attach("s1").await.unwrap().unwrap();
        let old_id = first.attachment_id.unwrap();

        h.manager.kill("s1").await;
        h.manager.register("s1", "vc-s1").await;
        h.manager.attach("s1").await.unwrap();

        h.manager.shared.on_data("s1", old_id, b"stale".to_vec()).await;
        h.manager.shared.on_exit("s1", old_id, 0).await;

        let info = h.manager.get("s1").await.unwrap();
        assert_eq!(info.state, SessionState::Attached);
        assert_eq!(info.buffered_chunks, 0);
    }

    #[tokio::test]
    async fn soft_failures_when_not_attached() {
        let h = harness();
        h.manager.register("s1", "vc-s1").await;
        assert!(!h.manager.write("s1", b"ls\r").await);
        assert!(!h.manager.resize("s1", 80, 24).await);
        assert!(!h.manager.detach("s1").await);
        assert!(!h.manager.write("ghost", b"ls\r").await);
        assert!(!h.manager.detach("ghost").await);
    }

    #[tokio::test]
    async fn write_resize_and_detach_reach_attachment() {
        let h = harness();
        h.manager.register("s1", "vc-s1").await;
        h.manager.attach("s1").await.unwrap();
        let state = h.spawner.state(0);

        assert!(h.manager.write("s1", b"ls\r").await);
        assert!(h.manager.resize("s1", 200, 50).await);
        assert!(h.manager.detach("s1").await);

        assert_eq!(*state.written.lock().unwrap(), b"ls\r\x02d".to_vec());
        assert_eq!(*state.size.lock().unwrap(), Some((200, 50)));
        assert!(!state.killed.load(Ordering::SeqCst));

        // A later re-attach opens at the remembered size.
        let (watcher, mut rx) = ChannelSink::new();
        h.manager.subscribe("s1", watcher).await;
        h.host.set_alive("vc-s1", true);
        h.spawner.emit(0, PtyEvent::Exit(0));
        assert!(matches!(next(&mut rx).await, ServerMessage::Detached { .. }));

        let info = h.manager.attach("s1").await.unwrap().unwrap();
        assert_eq!((info.cols, info.rows), (200, 50));
        let req = h.spawner.request(1);
        assert_eq!((req.cols, req.rows), (200, 50));
    }

    #[tokio::test]
    async fn kill_removes_everything_and_is_idempotent() {
        let h = harness();
        h.manager
            .create("s1", Path::new("/work"), &[], Some("vc-s1abcde"))
            .await
            .unwrap();
        h.manager.attach("s1").await.unwrap();
        let state = h.spawner.state(0);

        assert!(h.manager.kill("s1").await);
        assert!(h.manager.get("s1").await.is_none());
        assert!(!h.manager.is_alive("s1").await);
        assert!(state.killed.load(Ordering::SeqCst));
        assert!(!h.host.exists("vc-s1abcde"));

        assert!(!h.manager.kill("s1").await);
        assert_eq!(h.manager.count().await, 0);
    }

    #[tokio::test]
    async fn kill_swallows_already_gone_host() {
        let h = harness();
        h.manager.register("s1", "vc-gone").await;
        assert!(h.manager.kill("s1").await);
        assert_eq!(*h.host.killed.lock().unwrap(), vec!["vc-gone".to_string()]);
        assert!(h.manager.get("s1").await.is_none());
    }

    #[tokio::test]
    async fn kill_tells_subscribers_the_session_is_gone() {
        let h = harness();
        h.manager
            .create("s1", Path::new("/work"), &[], None)
            .await
            .unwrap();
        let (c1, mut rx1) = ChannelSink::new();
        h.manager.subscribe("s1", c1).await;

        assert!(h.manager.kill("s1").await);
        assert_eq!(
            next(&mut rx1).await,
            ServerMessage::Exit {
                session_id: "s1".into(),
                exit_code: -1,
            }
        );

        // The dying attachment's own exit finds no record.
        h.spawner.emit(0, PtyEvent::Exit(0));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_shell_tells_subscribers_the_shell_is_gone() {
        let h = harness();
        h.manager.create_shell("sh1", None).await.unwrap();
        let (c1, mut rx1) = ChannelSink::new();
        h.manager.subscribe("sh1", c1).await;

        assert!(h.manager.close_shell("sh1").await);
        assert_eq!(
            next(&mut rx1).await,
            ServerMessage::Exit {
                session_id: "sh1".into(),
                exit_code: -1,
            }
        );
    }

    #[tokio::test]
    async fn re_register_retires_the_old_attachment() {
        let h = harness();
        h.manager.register("s1", "vc-s1").await;
        let (c1, mut rx1) = ChannelSink::new();
        h.manager.subscribe("s1", c1).await;
        let old = h.spawner.state(0);

        let info = h.manager.register("s1", "vc-s1").await;
        assert_eq!(info.state, SessionState::Created);
        assert!(old.killed.load(Ordering::SeqCst));
        assert!(matches!(next(&mut rx1).await, ServerMessage::Exit { .. }));

        // The old pump must not disturb the replacement.
        h.spawner.emit(0, PtyEvent::Exit(0));
        h.manager.attach("s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let info = h.manager.get("s1").await.unwrap();
        assert_eq!(info.state, SessionState::Attached);
        assert_eq!(h.spawner.count(), 2);
    }

    #[tokio::test]
    async fn re_create_retires_the_old_attachment() {
        let h = harness();
        h.manager
            .create("s1", Path::new("/work"), &[], Some("vc-first"))
            .await
            .unwrap();
        h.manager.attach("s1").await.unwrap();

        h.manager
            .create("s1", Path::new("/work"), &[], Some("vc-second"))
            .await
            .unwrap();
        assert!(h.spawner.state(0).killed.load(Ordering::SeqCst));
        let info = h.manager.get("s1").await.unwrap();
        assert_eq!(info.host_name.as_deref(), Some("vc-second"));
        assert_eq!(info.attachment_id, None);
    }

    #[tokio::test]
    async fn spawned_processes_drop_tmux_client_vars() {
        let h = harness();
        h.manager.register("s1", "vc-s1").await;
        h.manager.attach("s1").await.unwrap();
        h.manager.create_shell("sh1", None).await.unwrap();

        for index in 0..2 {
            let req = h.spawner.request(index);
            assert!(req.env_remove.contains(&"TMUX".to_string()));
        }
    }

    #[tokio::test]
    async fn reap_skips_attached_sessions() {
        let h = harness();
        h.manager.register("s1", "vc-s1").await;
        let (c1, mut rx1) = ChannelSink::new();
        h.manager.subscribe("s1", c1).await;

        // Attached sessions are never candidates, even with a dead host.
        assert!(h.manager.reap().await.is_empty());

        h.spawner.emit(0, PtyEvent::Exit(0));
        assert!(matches!(next(&mut rx1).await, ServerMessage::Detached { .. }));
        assert!(matches!(next(&mut rx1).await, ServerMessage::Exit { .. }));
        assert!(h.manager.reap().await.is_empty());
    }

    #[tokio::test]
    async fn create_failure_registers_nothing() {
        let host = Arc::new(FakeHost {
            fail_create: true,
            ..FakeHost::default()
        });
        let spawner = Arc::new(FakeSpawner::default());
        let manager = SessionManager::new(SessionConfig::default(), host, spawner);

        match manager.create("s1", Path::new("/work"), &[], None).await {
            Err(VcError::Launch(msg)) => assert!(msg.contains("No such file"), "{msg}"),
            other => panic!("expected launch error, got {other:?}"),
        }
        assert!(manager.get("s1").await.is_none());
    }

    #[tokio::test]
    async fn register_adopts_without_spawning() {
        let h = harness();
        h.host.set_alive("vc-old", true);
        let info = h.manager.register("s9", "vc-old").await;
        assert_eq!(info.state, SessionState::Created);
        assert_eq!(info.buffered_chunks, 0);
        assert_eq!(h.spawner.count(), 0);
        assert!(h.host.created.lock().unwrap().is_empty());
        assert!(h.manager.is_alive("s9").await);

        h.host.set_alive("vc-old", false);
        assert!(!h.manager.is_alive("s9").await);
    }

    #[tokio::test]
    async fn create_shell_is_idempotent() {
        let h = harness();
        let first = h
            .manager
            .create_shell("sh1", Some(Path::new("/first")))
            .await
            .unwrap();
        let second = h
            .manager
            .create_shell("sh1", Some(Path::new("/second")))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.cwd.as_deref(), Some("/first"));
        assert_eq!(second.kind, SessionKind::Standalone);
        assert_eq!(second.state, SessionState::Attached);
        assert_eq!(h.spawner.count(), 1);

        let req = h.spawner.request(0);
        assert_eq!(req.program, "/bin/zsh");
        assert_eq!(req.args, vec!["-l"]);
        assert_eq!(req.cwd, Some(PathBuf::from("/first")));
    }

    #[tokio::test]
    async fn shell_exit_removes_without_detached_state() {
        let h = harness();
        h.manager.create_shell("sh1", None).await.unwrap();
        let (c1, mut rx1) = ChannelSink::new();
        assert!(h.manager.subscribe("sh1", c1).await);

        h.spawner.emit(0, PtyEvent::Data(b"$ ".to_vec()));
        next(&mut rx1).await;
        h.spawner.emit(0, PtyEvent::Exit(130));
        assert_eq!(
            next(&mut rx1).await,
            ServerMessage::Exit {
                session_id: "sh1".into(),
                exit_code: 130,
            }
        );
        assert!(h.manager.get("sh1").await.is_none());
    }

    #[tokio::test]
    async fn shell_spawn_failure_registers_nothing() {
        let h = harness();
        h.spawner.fail.store(true, Ordering::SeqCst);
        assert!(matches!(
            h.manager.create_shell("sh1", None).await,
            Err(VcError::Launch(_))
        ));
        assert!(h.manager.get("sh1").await.is_none());
    }

    #[tokio::test]
    async fn close_shell_only_targets_shells() {
        let h = harness();
        h.manager.register("s1", "vc-s1").await;
        h.manager.attach("s1").await.unwrap();
        h.manager.create_shell("sh1", None).await.unwrap();

        assert!(!h.manager.close_shell("s1").await);
        assert!(h.manager.get("s1").await.is_some());
        assert!(!h.spawner.state(0).killed.load(Ordering::SeqCst));

        assert!(h.manager.close_shell("sh1").await);
        assert!(h.spawner.state(1).killed.load(Ordering::SeqCst));
        assert!(h.manager.get("sh1").await.is_none());
        assert!(!h.manager.close_shell("sh1").await);
    }

    #[tokio::test]
    async fn list_shells_filters_hosted() {
        let h = harness();
        h.manager.register("s1", "vc-s1").await;
        h.manager.create_shell("sh1", None).await.unwrap();
        h.manager.create_shell("sh2", None).await.unwrap();

        let mut shells: Vec<String> = h
            .manager
            .list_shells()
            .await
            .into_iter()
            .map(|s| s.id)
            .collect();
        shells.sort();
        assert_eq!(shells, vec!["sh1", "sh2"]);
        assert_eq!(h.manager.list().await.len(), 3);
    }

    #[tokio::test]
    async fn closed_sinks_are_pruned_on_broadcast() {
        let h = harness();
        h.manager.register("s1", "vc-s1").await;
        let (c1, mut rx1) = ChannelSink::new();
        let (c2, _rx2) = ChannelSink::new();
        h.manager.subscribe("s1", c1).await;
        h.manager.subscribe("s1", c2.clone()).await;
        assert_eq!(h.manager.get("s1").await.unwrap().subscribers, 2);

        c2.close();
        h.spawner.emit(0, PtyEvent::Data(b"x".to_vec()));
        next(&mut rx1).await;
        assert_eq!(h.manager.get("s1").await.unwrap().subscribers, 1);
    }

    #[tokio::test]
    async fn unsubscribe_keeps_streaming_by_default() {
        let h = harness();
        h.manager.register("s1", "vc-s1").await;
        let (c1, _rx1) = ChannelSink::new();
        let c1: SinkRef = c1;
        h.manager.subscribe("s1", c1.clone()).await;
        assert!(h.manager.unsubscribe("s1", &c1).await);
        assert!(!h.manager.unsubscribe("s1", &c1).await);

        let info = h.manager.get("s1").await.unwrap();
        assert_eq!(info.state, SessionState::Attached);
        assert!(h.spawner.state(0).written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn idle_detach_policy_detaches_on_last_unsubscribe() {
        let h = harness_with(SessionConfig {
            idle_policy: IdlePolicy::Detach,
            ..SessionConfig::default()
        });
        h.manager.register("s1", "vc-s1").await;
        let (c1, _rx1) = ChannelSink::new();
        let (c2, _rx2) = ChannelSink::new();
        let c1: SinkRef = c1;
        let c2: SinkRef = c2;
        h.manager.subscribe("s1", c1.clone()).await;
        h.manager.subscribe("s1", c2.clone()).await;
        let state = h.spawner.state(0);

        h.manager.unsubscribe("s1", &c1).await;
        assert!(state.written.lock().unwrap().is_empty());
        assert_eq!(h.manager.unsubscribe_all(&c2).await, 1);
        assert_eq!(*state.written.lock().unwrap(), b"\x02d".to_vec());
    }

    #[tokio::test]
    async fn unsubscribe_all_spans_sessions() {
        let h = harness();
        h.manager.register("a", "vc-a").await;
        h.manager.register("b", "vc-b").await;
        let (c1, _rx1) = ChannelSink::new();
        let c1: SinkRef = c1;
        h.manager.subscribe("a", c1.clone()).await;
        h.manager.subscribe("b", c1.clone()).await;

        assert_eq!(h.manager.unsubscribe_all(&c1).await, 2);
        assert_eq!(h.manager.get("a").await.unwrap().subscribers, 0);
        assert_eq!(h.manager.get("b").await.unwrap().subscribers, 0);
    }

    #[tokio::test]
    async fn reap_removes_vanished_hosts() {
        let h = harness();
        h.host.set_alive("vc-live", true);
        h.manager.register("live", "vc-live").await;
        h.manager.register("dead", "vc-dead").await;
        h.manager.create_shell("sh1", None).await.unwrap();

        assert_eq!(h.manager.reap().await, vec!["dead".to_string()]);
        assert!(h.manager.get("live").await.is_some());
        assert!(h.manager.get("sh1").await.is_some());
        assert!(h.manager.get("dead").await.is_none());
    }

    #[tokio::test]
    async fn shutdown_kills_attachments_but_not_hosts() {
        let h = harness();
        h.manager
            .create("s1", Path::new("/work"), &[], None)
            .await
            .unwrap();
        h.manager.attach("s1").await.unwrap();
        h.manager.create_shell("sh1", None).await.unwrap();

        assert_eq!(h.manager.shutdown().await, 2);
        assert!(h.spawner.state(0).killed.load(Ordering::SeqCst));
        assert!(h.spawner.state(1).killed.load(Ordering::SeqCst));
        assert!(h.host.exists("vc-s1"));
        assert_eq!(h.manager.count().await, 0);
    }

    #[test]
    fn idle_policy_parses() {
        assert_eq!("detach".parse::<IdlePolicy>().unwrap(), IdlePolicy::Detach);
        assert_eq!(
            "keep-streaming".parse::<IdlePolicy>().unwrap(),
            IdlePolicy::KeepStreaming
        );
        assert!("sometimes".parse::<IdlePolicy>().is_err());
    }
}
