// dbvault/src/testing.rs
//! In-memory collaborators for orchestrator tests.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite};
use tokio_util::io::StreamReader;

use crate::catalog::{DatabaseRecord, StaticCatalog};
use crate::config::OrchestratorOptions;
use crate::exec::{ContainerExec, ExecAttachment, ExecInput, ExecOutput, ExecOutputStream, ExecSpec};
use crate::orchestrator::Orchestrator;
use crate::storage::{ObjectReader, ObjectStore, ObjectStoreProvider, PutOutcome};
use crate::store::{Backup, BackupSettings, BackupStatus, BackupStore, NewBackup, SettingsStore};

pub const DB_ID: i64 = 1;
pub const BUCKET: &str = "vault";

pub fn app_database() -> DatabaseRecord {
    DatabaseRecord {
        id: DB_ID,
        name: "app".to_string(),
        container_id: "app-db".to_string(),
        username: "postgres".to_string(),
    }
}

pub fn enabled_settings(database_id: i64) -> BackupSettings {
    BackupSettings {
        enabled: true,
        endpoint: "http://minio:9000".to_string(),
        bucket: BUCKET.to_string(),
        access_key: "AKIA".to_string(),
        secret_key: "secret".to_string(),
        path_prefix: "/backups".to_string(),
        ..BackupSettings::defaults(database_id, "acme")
    }
}

// ---- stores ----

pub struct MemorySettingsStore {
    rows: Mutex<HashMap<i64, BackupSettings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, database_id: i64) -> Result<BackupSettings> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&database_id)
            .cloned()
            .unwrap_or_else(|| BackupSettings::defaults(database_id, "acme")))
    }

    async fn upsert(&self, settings: &BackupSettings) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .insert(settings.database_id, settings.clone());
        Ok(())
    }
}

pub struct MemoryBackupStore {
    rows: Mutex<Vec<Backup>>,
    next_id: AtomicI64,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Seeds a record as-is, e.g. one that predates stored object keys.
    pub fn insert(&self, backup: Backup) {
        self.next_id.fetch_max(backup.id + 1, Ordering::SeqCst);
        self.rows.lock().unwrap().push(backup);
    }

    pub fn all(&self) -> Vec<Backup> {
        self.rows.lock().unwrap().clone()
    }

    fn finish(&self, backup_id: i64, apply: impl FnOnce(&mut Backup)) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|b| b.id == backup_id && b.status == BackupStatus::Pending)
            .ok_or_else(|| anyhow!("backup {} is not pending", backup_id))?;
        apply(row);
        Ok(())
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn create_pending(&self, new: &NewBackup) -> Result<Backup> {
        let backup = Backup {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            database_id: new.database_id,
            filename: new.filename.clone(),
            object_key: Some(new.object_key.clone()),
            size_bytes: None,
            status: BackupStatus::Pending,
            s3_url: None,
            error: None,
            created_at: Utc::now(),
        };
        self.rows.lock().unwrap().push(backup.clone());
        Ok(backup)
    }

    async fn mark_completed(&self, backup_id: i64, size_bytes: i64, s3_url: &str) -> Result<()> {
        self.finish(backup_id, |b| {
            b.status = BackupStatus::Completed;
            b.size_bytes = Some(size_bytes);
            b.s3_url = Some(s3_url.to_string());
        })
    }

    async fn mark_failed(&self, backup_id: i64, error: &str) -> Result<()> {
        self.finish(backup_id, |b| {
            b.status = BackupStatus::Failed;
            b.error = Some(error.to_string());
        })
    }

    async fn get(&self, backup_id: i64) -> Result<Option<Backup>> {
        Ok(self.all().into_iter().find(|b| b.id == backup_id))
    }

    async fn list_for_database(&self, database_id: i64) -> Result<Vec<Backup>> {
        // Insertion order on purpose; callers sort.
        Ok(self
            .all()
            .into_iter()
            .filter(|b| b.database_id == database_id)
            .collect())
    }
}

// ---- exec bridge ----

/// What a scripted command prints and how it ends.
#[derive(Debug, Clone, Default)]
pub struct ExecScript {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i64,
    /// The output stream errors after stdout.
    pub break_stream: bool,
    /// The output stream never ends.
    pub hang: bool,
}

impl ExecScript {
    pub fn ok(stdout: &[u8]) -> Self {
        Self {
            stdout: stdout.to_vec(),
            ..Self::default()
        }
    }

    pub fn exit(exit_code: i64, stderr: &str) -> Self {
        Self {
            stderr: stderr.as_bytes().to_vec(),
            exit_code,
            ..Self::default()
        }
    }
}

struct FakeSession {
    spec: ExecSpec,
    script: ExecScript,
}

/// Scripted exec bridge. Commands are matched by a substring of their joined
/// argv; unmatched commands succeed silently.
pub struct FakeExec {
    scripts: Mutex<Vec<(String, ExecScript)>>,
    sessions: Mutex<HashMap<String, FakeSession>>,
    created: Mutex<Vec<Vec<String>>>,
    killed: Mutex<Vec<String>>,
    stdin: Arc<Mutex<Vec<u8>>>,
    next_session: AtomicI64,
    pub fail_create: AtomicBool,
    pub fail_attach: AtomicBool,
}

impl FakeExec {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
            stdin: Arc::default(),
            next_session: AtomicI64::new(1),
            fail_create: AtomicBool::new(false),
            fail_attach: AtomicBool::new(false),
        }
    }

    pub fn script(&self, needle: &str, script: ExecScript) {
        self.scripts
            .lock()
            .unwrap()
            .push((needle.to_string(), script));
    }

    /// argv of every session created so far, in order.
    pub fn created(&self) -> Vec<Vec<String>> {
        self.created.lock().unwrap().clone()
    }

    pub fn created_matching(&self, needle: &str) -> usize {
        self.created()
            .iter()
            .filter(|argv| argv.join(" ").contains(needle))
            .count()
    }

    pub fn killed(&self) -> usize {
        self.killed.lock().unwrap().len()
    }

    /// Everything written to any session's stdin.
    pub fn stdin(&self) -> Vec<u8> {
        self.stdin.lock().unwrap().clone()
    }

    fn script_for(&self, argv: &[String]) -> ExecScript {
        let joined = argv.join(" ");
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| joined.contains(needle.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerExec for FakeExec {
    async fn exec_create(&self, _container_id: &str, spec: ExecSpec) -> Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            bail!("container runtime unreachable");
        }
        self.created.lock().unwrap().push(spec.argv.clone());
        let id = format!("session-{}", self.next_session.fetch_add(1, Ordering::SeqCst));
        let script = self.script_for(&spec.argv);
        self.sessions
            .lock()
            .unwrap()
            .insert(id.clone(), FakeSession { spec, script });
        Ok(id)
    }

    async fn exec_attach(&self, session_id: &str) -> Result<ExecAttachment> {
        if self.fail_attach.load(Ordering::SeqCst) {
            bail!("attach refused");
        }
        let sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| anyhow!("unknown session {}", session_id))?;
        let script = &session.script;

        let output: ExecOutputStream = if script.hang {
            futures::stream::pending().boxed()
        } else {
            let mut chunks: Vec<io::Result<ExecOutput>> = Vec::new();
            if !script.stdout.is_empty() {
                // Several chunks, so the pipe sees more than one send.
                for part in script.stdout.chunks(4) {
                    chunks.push(Ok(ExecOutput::Stdout(Bytes::copy_from_slice(part))));
                }
            }
            if !script.stderr.is_empty() {
                chunks.push(Ok(ExecOutput::Stderr(Bytes::copy_from_slice(&script.stderr))));
            }
            if script.break_stream {
                chunks.push(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "exec stream reset by peer",
                )));
            }
            futures::stream::iter(chunks).boxed()
        };

        let input = session
            .spec
            .attach_stdin
            .then(|| Box::pin(CaptureWriter(self.stdin.clone())) as ExecInput);
        Ok(ExecAttachment { output, input })
    }

    async fn exec_inspect(&self, session_id: &str) -> Result<i64> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|s| s.script.exit_code)
            .ok_or_else(|| anyhow!("unknown session {}", session_id))
    }

    async fn exec_kill(&self, session_id: &str) -> Result<()> {
        self.killed.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}

struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl AsyncWrite for CaptureWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// ---- object storage ----

pub struct FakeStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    unsignable: Mutex<HashSet<String>>,
    presigned: Mutex<Vec<String>>,
    pub fail_put: AtomicBool,
    pub fail_get: AtomicBool,
    /// Downloads deliver the object, then fail with a connection reset.
    pub break_download: AtomicBool,
    pub fail_connect: AtomicBool,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            unsignable: Mutex::new(HashSet::new()),
            presigned: Mutex::new(Vec::new()),
            fail_put: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            break_download: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
        }
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&format!("{}/{}", bucket, key))
            .cloned()
    }

    pub fn put_object(&self, bucket: &str, key: &str, body: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{}/{}", bucket, key), body.to_vec());
    }

    pub fn refuse_to_sign(&self, key: &str) {
        self.unsignable.lock().unwrap().insert(key.to_string());
    }

    /// Keys presign was asked for, in order.
    pub fn presigned(&self) -> Vec<String> {
        self.presigned.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeStorage {
    async fn put_stream(&self, bucket: &str, key: &str, mut body: ObjectReader) -> Result<PutOutcome> {
        if self.fail_put.load(Ordering::SeqCst) {
            bail!("PutObject: 503 Slow Down");
        }
        let mut data = Vec::new();
        body.read_to_end(&mut data).await?;
        let size_bytes = data.len() as u64;
        self.put_object(bucket, key, &data);
        Ok(PutOutcome { size_bytes })
    }

    async fn get_stream(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        if self.fail_get.load(Ordering::SeqCst) {
            bail!("GetObject: connection refused");
        }
        let data = self
            .object(bucket, key)
            .ok_or_else(|| anyhow!("NoSuchKey: {}", key))?;
        if self.break_download.load(Ordering::SeqCst) {
            let chunks = vec![
                Ok(Bytes::from(data)),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "download reset")),
            ];
            return Ok(Box::pin(StreamReader::new(futures::stream::iter(chunks))));
        }
        Ok(Box::pin(io::Cursor::new(data)))
    }

    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        self.presigned.lock().unwrap().push(key.to_string());
        if self.unsignable.lock().unwrap().contains(key) {
            bail!("cannot sign {}", key);
        }
        Ok(format!(
            "https://signed.example/{}/{}?expires={}",
            bucket,
            key,
            ttl.as_secs()
        ))
    }
}

pub struct FakeStorageProvider(pub Arc<FakeStorage>);

#[async_trait]
impl ObjectStoreProvider for FakeStorageProvider {
    async fn connect(&self, _settings: &BackupSettings) -> Result<Arc<dyn ObjectStore>> {
        if self.0.fail_connect.load(Ordering::SeqCst) {
            bail!("invalid endpoint");
        }
        Ok(self.0.clone())
    }
}

// ---- harness ----

/// An orchestrator over in-memory doubles with database 1 ("app")
/// registered and storage enabled.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub settings: Arc<MemorySettingsStore>,
    pub records: Arc<MemoryBackupStore>,
    pub exec: Arc<FakeExec>,
    pub storage: Arc<FakeStorage>,
}

impl Harness {
    pub async fn new() -> Self {
        let settings = Arc::new(MemorySettingsStore::new());
        settings.upsert(&enabled_settings(DB_ID)).await.unwrap();
        let records = Arc::new(MemoryBackupStore::new());
        let exec = Arc::new(FakeExec::new());
        let storage = Arc::new(FakeStorage::new());

        let orchestrator = Orchestrator::new(
            settings.clone(),
            records.clone(),
            Arc::new(StaticCatalog::new(vec![app_database()])),
            exec.clone(),
            Arc::new(FakeStorageProvider(storage.clone())),
            OrchestratorOptions {
                pipe_capacity: 2,
                ..OrchestratorOptions::default()
            },
        );

        Self {
            orchestrator,
            settings,
            records,
            exec,
            storage,
        }
    }

    pub async fn update_settings(&self, change: impl FnOnce(&mut BackupSettings)) {
        let mut current = self.settings.get(DB_ID).await.unwrap();
        change(&mut current);
        self.settings.upsert(&current).await.unwrap();
    }
}
