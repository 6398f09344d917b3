//! In-process drive.
//!
//! Files live in a map keyed by item id; folders are implied by paths. The
//! converter is a plain function over the uploaded bytes, deterministic by
//! default, so whole-pipeline runs can be compared byte for byte. Any
//! operation can be told to fail, which is how the orchestrator's
//! leave-for-inspection behaviour is exercised.

use super::{ArtifactId, ByteStream, DriveError, FolderRef, RemoteDrive, RemoteItem};
use crate::config::OutputFormat;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const MEMORY_DRIVE_ID: &str = "memory";
const ROOT_FOLDER: &str = "root";

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveOperation {
    AccountName,
    Locate,
    Download,
    Upload,
    /// `convert` itself returns an error.
    Convert,
    /// `convert` succeeds, but the byte stream breaks after the first chunk.
    Stream,
    Delete,
}

/// Renders uploaded bytes into the "converted" artifact.
pub type Renderer = Arc<dyn Fn(&[u8], OutputFormat) -> Vec<u8> + Send + Sync>;

#[derive(Debug, Clone)]
struct StoredFile {
    folder: String,
    name: String,
    content: Bytes,
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, StoredFile>,
    next_id: u64,
    failures: HashSet<DriveOperation>,
    hanging: HashSet<DriveOperation>,
    calls: Vec<DriveOperation>,
}

pub struct MemoryDrive {
    state: Mutex<State>,
    renderer: Renderer,
    account: Option<String>,
}

impl Default for MemoryDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDrive {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            renderer: Arc::new(fake_render),
            account: Some("Memory User".to_string()),
        }
    }

    /// Replace the default converter.
    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Store `content` at `path` (`Folder/Sub/Name.docx`), returning its id.
    pub fn insert(&self, path: &str, content: impl Into<Bytes>) -> ArtifactId {
        let (folder, name) = split_path(path);
        let mut state = self.lock();
        let id = state.allocate();
        state.files.insert(
            id.clone(),
            StoredFile {
                folder,
                name,
                content: content.into(),
            },
        );
        ArtifactId::new(MEMORY_DRIVE_ID, id)
    }

    /// Make every later call of `op` fail.
    pub fn fail_on(&self, op: DriveOperation) {
        self.lock().failures.insert(op);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Make every later call of `op` wait forever, like a request the
    /// network never answers.
    pub fn hang_on(&self, op: DriveOperation) {
        self.lock().hanging.insert(op);
    }

    pub fn exists(&self, id: &ArtifactId) -> bool {
        self.lock().files.contains_key(&id.item_id)
    }

    /// Names of every stored file, sorted.
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().files.values().map(|f| f.name.clone()).collect();
        names.sort();
        names
    }

    pub fn content(&self, id: &ArtifactId) -> Option<Bytes> {
        self.lock().files.get(&id.item_id).map(|f| f.content.clone())
    }

    /// Every operation attempted so far, in order.
    pub fn calls(&self) -> Vec<DriveOperation> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn stall(&self, op: DriveOperation) {
        let hang = self.lock().hanging.contains(&op);
        if hang {
            self.lock().calls.push(op);
            std::future::pending::<()>().await;
        }
    }

    fn enter(&self, op: DriveOperation) -> Result<MutexGuard<'_, State>, DriveError> {
        let mut state = self.lock();
        state.calls.push(op);
        if state.failures.contains(&op) {
            return Err(DriveError::Http {
                status: 503,
                code: "serviceNotAvailable".into(),
                message: format!("injected {op:?} failure"),
            });
        }
        Ok(state)
    }
}

impl State {
    fn allocate(&mut self) -> String {
        self.next_id += 1;
        format!("item-{}", self.next_id)
    }
}

#[async_trait]
impl RemoteDrive for MemoryDrive {
    async fn account_name(&self) -> Result<Option<String>, DriveError> {
        self.stall(DriveOperation::AccountName).await;
        self.enter(DriveOperation::AccountName)?;
        Ok(self.account.clone())
    }

    async fn locate(&self, path: &str) -> Result<RemoteItem, DriveError> {
        self.stall(DriveOperation::Locate).await;
        let state = self.enter(DriveOperation::Locate)?;
        let (folder, name) = split_path(path);
        state
            .files
            .iter()
            .find(|(_, f)| f.folder == folder && f.name == name)
            .map(|(id, f)| RemoteItem {
                id: ArtifactId::new(MEMORY_DRIVE_ID, id.clone()),
                name: f.name.clone(),
                parent: FolderRef {
                    drive_id: MEMORY_DRIVE_ID.to_string(),
                    item_id: f.folder.clone(),
                },
            })
            .ok_or_else(|| DriveError::NotFound(path.to_string()))
    }

    async fn download(&self, item: &RemoteItem) -> Result<Bytes, DriveError> {
        self.stall(DriveOperation::Download).await;
        let state = self.enter(DriveOperation::Download)?;
        state
            .files
            .get(&item.id.item_id)
            .map(|f| f.content.clone())
            .ok_or_else(|| DriveError::NotFound(item.name.clone()))
    }

    async fn upload(
        &self,
        folder: &FolderRef,
        name: &str,
        content: Vec<u8>,
    ) -> Result<ArtifactId, DriveError> {
        self.stall(DriveOperation::Upload).await;
        let mut state = self.enter(DriveOperation::Upload)?;
        let existing = state
            .files
            .iter()
            .find(|(_, f)| f.folder == folder.item_id && f.name == name)
            .map(|(id, _)| id.clone());
        let id = match existing {
            Some(id) => id,
            None => state.allocate(),
        };
        state.files.insert(
            id.clone(),
            StoredFile {
                folder: folder.item_id.clone(),
                name: name.to_string(),
                content: Bytes::from(content),
            },
        );
        Ok(ArtifactId::new(MEMORY_DRIVE_ID, id))
    }

    async fn convert(
        &self,
        artifact: &ArtifactId,
        format: OutputFormat,
    ) -> Result<ByteStream, DriveError> {
        self.stall(DriveOperation::Convert).await;
        let state = self.enter(DriveOperation::Convert)?;
        let source = state
            .files
            .get(&artifact.item_id)
            .map(|f| f.content.clone())
            .ok_or_else(|| DriveError::NotFound(artifact.item_id.clone()))?;
        let broken = state.failures.contains(&DriveOperation::Stream);
        drop(state);

        let rendered = Bytes::from((self.renderer)(&source, format));
        let mid = rendered.len() / 2;
        let mut chunks: Vec<Result<Bytes, DriveError>> = vec![Ok(rendered.slice(..mid))];
        if broken {
            chunks.push(Err(DriveError::Timeout("injected stream failure".into())));
        } else {
            chunks.push(Ok(rendered.slice(mid..)));
        }
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn delete(&self, artifact: &ArtifactId) -> Result<(), DriveError> {
        self.stall(DriveOperation::Delete).await;
        let mut state = self.enter(DriveOperation::Delete)?;
        state
            .files
            .remove(&artifact.item_id)
            .map(|_| ())
            .ok_or_else(|| DriveError::NotFound(artifact.item_id.clone()))
    }
}

/// `Folder/Sub/Name.docx` → (`Folder/Sub`, `Name.docx`); top-level files
/// live in the root folder. A leading `/` is ignored.
fn split_path(path: &str) -> (String, String) {
    let path = path.trim_start_matches('/');
    match path.rsplit_once('/') {
        Some((folder, name)) => (folder.to_string(), name.to_string()),
        None => (ROOT_FOLDER.to_string(), path.to_string()),
    }
}

/// Deterministic stand-in converter: a format header, the source bytes, and
/// a trailer.
pub fn fake_render(source: &[u8], format: OutputFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(source.len() + 32);
    match format.magic() {
        Some(magic) => out.extend_from_slice(magic),
        None => out.extend_from_slice(format.token().as_bytes()),
    }
    out.extend_from_slice(b"\n% rendered in memory\n");
    out.extend_from_slice(source);
    out.extend_from_slice(b"\n%%EOF\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(mut stream: ByteStream) -> Result<Vec<u8>, DriveError> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn locate_upload_convert_delete() {
        let drive = MemoryDrive::new();
        drive.insert("Documents/Letter.docx", b"template".to_vec());

        let item = drive.locate("/Documents/Letter.docx").await.unwrap();
        assert_eq!(item.name, "Letter.docx");
        assert_eq!(item.parent.item_id, "Documents");
        assert_eq!(&drive.download(&item).await.unwrap()[..], b"template");

        let id = drive
            .upload(&item.parent, "Letter_temp.docx", b"filled".to_vec())
            .await
            .unwrap();
        let pdf = collect(drive.convert(&id, OutputFormat::Pdf).await.unwrap())
            .await
            .unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        assert!(pdf.windows(6).any(|w| w == b"filled"));

        drive.delete(&id).await.unwrap();
        assert!(!drive.exists(&id));
        assert_eq!(drive.file_names(), vec!["Letter.docx"]);
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let drive = MemoryDrive::new();
        let err = drive.locate("nope.docx").await.unwrap_err();
        assert!(matches!(err, DriveError::NotFound(_)));
    }

    #[tokio::test]
    async fn injected_failures() {
        let drive = MemoryDrive::new();
        let id = drive.insert("a.docx", b"x".to_vec());
        drive.fail_on(DriveOperation::Stream);
        let stream = drive.convert(&id, OutputFormat::Pdf).await.unwrap();
        assert!(matches!(collect(stream).await, Err(DriveError::Timeout(_))));

        drive.fail_on(DriveOperation::Delete);
        assert!(drive.delete(&id).await.is_err());
        assert!(drive.exists(&id));
        assert_eq!(
            drive.calls(),
            vec![DriveOperation::Convert, DriveOperation::Delete]
        );
    }

    #[tokio::test]
    async fn upload_to_same_name_overwrites() {
        let drive = MemoryDrive::new();
        let folder = FolderRef {
            drive_id: MEMORY_DRIVE_ID.into(),
            item_id: ROOT_FOLDER.into(),
        };
        let a = drive.upload(&folder, "t.docx", b"1".to_vec()).await.unwrap();
        let b = drive.upload(&folder, "t.docx", b"2".to_vec()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(drive.content(&a).unwrap(), Bytes::from_static(b"2"));
    }

    #[tokio::test]
    async fn hung_operation_never_answers() {
        let drive = MemoryDrive::new();
        drive.insert("a.docx", b"x".to_vec());
        drive.hang_on(DriveOperation::Download);

        let item = drive.locate("a.docx").await.unwrap();
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), drive.download(&item)).await;
        assert!(waited.is_err());
        assert_eq!(
            drive.calls(),
            vec![DriveOperation::Locate, DriveOperation::Download]
        );
    }
}
