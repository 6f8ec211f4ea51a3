//! In-memory backend and connector for unit tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;

use crate::session::{Connector, RemoteLink};
use crate::sftp::path_utils::{file_name, parent_path};
use crate::sftp::{BoxedReader, BoxedWriter, EntryKind, FileBackend, FileEntry, PathStyle, SftpError};
use crate::ssh::{BoxedStream, HopSession, HostDescriptor, LiveHop, SshError};

#[derive(Debug, Clone)]
enum Node {
    Dir { mode: u32 },
    File { data: Vec<u8>, mode: u32 },
}

type Nodes = Arc<Mutex<BTreeMap<String, Node>>>;

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_child_of(key: &str, dir: &str) -> bool {
    key != "/" && parent_path(PathStyle::Remote, key) == dir
}

/// A `/`-rooted filesystem held in memory, with knobs for latency, failure
/// and session loss.
pub struct MemoryBackend {
    nodes: Nodes,
    list_calls: AtomicUsize,
    writes: AtomicUsize,
    bytes_written: Arc<AtomicU64>,
    session_lost: AtomicBool,
    streaming: AtomicBool,
    closed: AtomicBool,
    list_delays: Mutex<HashMap<String, Duration>>,
    read_delays: Mutex<HashMap<String, Duration>>,
    failing_writes: Mutex<HashSet<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir { mode: 0o755 });
        Self {
            nodes: Arc::new(Mutex::new(nodes)),
            list_calls: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            bytes_written: Arc::new(AtomicU64::new(0)),
            session_lost: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            list_delays: Mutex::new(HashMap::new()),
            read_delays: Mutex::new(HashMap::new()),
            failing_writes: Mutex::new(HashSet::new()),
        }
    }

    pub fn add_dir(&self, path: &str) {
        let path = normalize(path);
        let mut nodes = self.nodes.lock();
        let mut current = path.as_str();
        let mut chain = Vec::new();
        while current != "/" {
            chain.push(current.to_string());
            let idx = current.rfind('/').unwrap_or(0);
            current = if idx == 0 { "/" } else { &current[..idx] };
        }
        for dir in chain.into_iter().rev() {
            nodes.entry(dir).or_insert(Node::Dir { mode: 0o755 });
        }
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        let path = normalize(path);
        self.add_dir(&parent_path(PathStyle::Remote, &path));
        self.nodes.lock().insert(
            path,
            Node::File {
                data: data.to_vec(),
                mode: 0o644,
            },
        );
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.nodes.lock().get(&normalize(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(self.nodes.lock().get(&normalize(path)), Some(Node::Dir { .. }))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.lock().contains_key(&normalize(path))
    }

    pub fn set_session_lost(&self, lost: bool) {
        self.session_lost.store(lost, Ordering::SeqCst);
    }

    pub fn set_streaming(&self, streaming: bool) {
        self.streaming.store(streaming, Ordering::SeqCst);
    }

    pub fn set_list_delay(&self, path: &str, delay: Duration) {
        self.list_delays.lock().insert(normalize(path), delay);
    }

    pub fn set_read_delay(&self, path: &str, delay: Duration) {
        self.read_delays.lock().insert(normalize(path), delay);
    }

    pub fn fail_writes_to(&self, path: &str) {
        self.failing_writes.lock().insert(normalize(path));
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_session(&self) -> Result<(), SftpError> {
        if self.session_lost.load(Ordering::SeqCst) {
            return Err(SftpError::ProtocolError("connection reset by peer".into()));
        }
        Ok(())
    }

    fn entry_for(&self, path: &str, node: &Node) -> FileEntry {
        let (kind, size, mode) = match node {
            Node::Dir { mode } => (EntryKind::Directory, 0, *mode),
            Node::File { data, mode } => (EntryKind::File, data.len() as u64, *mode),
        };
        FileEntry {
            name: file_name(path).to_string(),
            kind,
            symlink_target_kind: None,
            size,
            modified_at: None,
            permissions: Some(format!("{:o}", mode)),
        }
    }

    fn check_write(&self, path: &str) -> Result<(), SftpError> {
        if self.failing_writes.lock().contains(path) {
            return Err(SftpError::WriteError(format!("disk quota exceeded: {}", path)));
        }
        let parent = parent_path(PathStyle::Remote, path);
        match self.nodes.lock().get(&parent) {
            Some(Node::Dir { .. }) => Ok(()),
            _ => Err(SftpError::FileNotFound(parent)),
        }
    }

    async fn read_delay(&self, path: &str) {
        let delay = self.read_delays.lock().get(path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes straight into the node map as bytes arrive
struct MemoryWriter {
    nodes: Nodes,
    path: String,
    bytes_written: Arc<AtomicU64>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut nodes = self.nodes.lock();
        if let Some(Node::File { data, .. }) = nodes.get_mut(&self.path) {
            data.extend_from_slice(buf);
        }
        self.bytes_written.fetch_add(buf.len() as u64, Ordering::SeqCst);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl FileBackend for MemoryBackend {
    fn path_style(&self) -> PathStyle {
        PathStyle::Remote
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
        self.check_session()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let path = normalize(path);

        let delay = self.list_delays.lock().get(&path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_session()?;

        let nodes = self.nodes.lock();
        match nodes.get(&path) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => return Err(SftpError::ProtocolError(format!("not a directory: {}", path))),
            None => return Err(SftpError::FileNotFound(path)),
        }
        Ok(nodes
            .iter()
            .filter(|(key, _)| is_child_of(key, &path))
            .map(|(key, node)| self.entry_for(key, node))
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<FileEntry, SftpError> {
        self.check_session()?;
        let path = normalize(path);
        let nodes = self.nodes.lock();
        let node = nodes.get(&path).ok_or_else(|| SftpError::FileNotFound(path.clone()))?;
        Ok(self.entry_for(&path, node))
    }

    async fn create_dir(&self, path: &str) -> Result<(), SftpError> {
        self.check_session()?;
        let path = normalize(path);
        self.check_write(&path)?;
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(&path) {
            return Err(SftpError::AlreadyExists(path));
        }
        nodes.insert(path, Node::Dir { mode: 0o755 });
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<(), SftpError> {
        self.check_session()?;
        let path = normalize(path);
        let mut nodes = self.nodes.lock();
        match nodes.get(&path) {
            Some(Node::File { .. }) => {
                nodes.remove(&path);
                Ok(())
            }
            Some(Node::Dir { .. }) => Err(SftpError::ProtocolError(format!("is a directory: {}", path))),
            None => Err(SftpError::FileNotFound(path)),
        }
    }

    async fn remove_dir(&self, path: &str) -> Result<(), SftpError> {
        self.check_session()?;
        let path = normalize(path);
        let mut nodes = self.nodes.lock();
        if nodes.keys().any(|k| is_child_of(k, &path)) {
            return Err(SftpError::ProtocolError(format!("directory not empty: {}", path)));
        }
        match nodes.remove(&path) {
            Some(_) => Ok(()),
            None => Err(SftpError::FileNotFound(path)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        self.check_session()?;
        let from = normalize(from);
        let to = normalize(to);
        let mut nodes = self.nodes.lock();
        if !nodes.contains_key(&from) {
            return Err(SftpError::FileNotFound(from));
        }
        let prefix = format!("{}/", from);
        let moved: Vec<String> = nodes
            .keys()
            .filter(|k| **k == from || k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = nodes.remove(&key) {
                let new_key = format!("{}{}", to, &key[from.len()..]);
                nodes.insert(new_key, node);
            }
        }
        Ok(())
    }

    async fn chmod(&self, path: &str, new_mode: u32) -> Result<(), SftpError> {
        self.check_session()?;
        let path = normalize(path);
        let mut nodes = self.nodes.lock();
        match nodes.get_mut(&path) {
            Some(Node::Dir { mode }) | Some(Node::File { mode, .. }) => {
                *mode = new_mode & 0o7777;
                Ok(())
            }
            None => Err(SftpError::FileNotFound(path)),
        }
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SftpError> {
        self.check_session()?;
        let path = normalize(path);
        self.read_delay(&path).await;
        self.file(&path).ok_or(SftpError::FileNotFound(path))
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), SftpError> {
        self.check_session()?;
        let path = normalize(path);
        self.check_write(&path)?;
        self.nodes.lock().insert(
            path,
            Node::File {
                data: data.to_vec(),
                mode: 0o644,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.bytes_written.fetch_add(data.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    fn supports_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    async fn open_reader(&self, path: &str) -> Result<BoxedReader, SftpError> {
        self.check_session()?;
        let path = normalize(path);
        self.read_delay(&path).await;
        let data = self.file(&path).ok_or(SftpError::FileNotFound(path))?;
        Ok(Box::new(io::Cursor::new(data)))
    }

    async fn open_writer(&self, path: &str) -> Result<BoxedWriter, SftpError> {
        self.check_session()?;
        let path = normalize(path);
        self.check_write(&path)?;
        self.nodes.lock().insert(
            path.clone(),
            Node::File {
                data: Vec::new(),
                mode: 0o644,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryWriter {
            nodes: self.nodes.clone(),
            path,
            bytes_written: self.bytes_written.clone(),
        }))
    }

    async fn close(&self) -> Result<(), SftpError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hop session that records its teardown
pub struct RecordingHop {
    label: String,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl HopSession for RecordingHop {
    fn label(&self) -> &str {
        &self.label
    }

    async fn open_tunnel(&self, _host: &str, _port: u16) -> Result<BoxedStream, SshError> {
        let (near, _far) = tokio::io::duplex(64);
        Ok(Box::new(near))
    }

    async fn teardown(self: Box<Self>) -> Result<(), SshError> {
        self.log.lock().push(self.label.clone());
        Ok(())
    }
}

/// Connector that hands out [`MemoryBackend`]s by hostname
pub struct MemoryConnector {
    hosts: Mutex<HashMap<String, Arc<MemoryBackend>>>,
    hops: Mutex<HashMap<String, Vec<String>>>,
    teardowns: Arc<Mutex<Vec<String>>>,
    connects: AtomicUsize,
    refuse: AtomicBool,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            hops: Mutex::new(HashMap::new()),
            teardowns: Arc::new(Mutex::new(Vec::new())),
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        }
    }

    pub fn add_host(&self, hostname: &str, backend: Arc<MemoryBackend>) {
        self.hosts.lock().insert(hostname.to_string(), backend);
    }

    pub fn with_hops(&self, hostname: &str, hops: &[&str]) {
        self.hops.lock().insert(
            hostname.to_string(),
            hops.iter().map(|h| h.to_string()).collect(),
        );
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn teardown_log(&self) -> Vec<String> {
        self.teardowns.lock().clone()
    }

    fn hop(&self, label: &str) -> LiveHop {
        Box::new(RecordingHop {
            label: label.to_string(),
            log: self.teardowns.clone(),
        })
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, host: &HostDescriptor) -> Result<RemoteLink, SftpError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SshError::ConnectionFailed(format!("{}: connection refused", host.hostname)).into());
        }
        let backend = self
            .hosts
            .lock()
            .get(&host.hostname)
            .cloned()
            .ok_or_else(|| SshError::ConnectionFailed(format!("unknown host {}", host.hostname)))?;

        let mut sessions: Vec<LiveHop> = self
            .hops
            .lock()
            .get(&host.hostname)
            .map(|labels| labels.iter().map(|l| self.hop(l)).collect())
            .unwrap_or_default();
        sessions.push(self.hop(&host.hostname));

        Ok(RemoteLink {
            backend,
            sessions,
        })
    }
}
