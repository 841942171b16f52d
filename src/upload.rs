use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::to_value;

use crate::archive::{build_archives, chunk_files, collect_leaf_files, entry_name, BuiltArchive};
use crate::collection::{ImageCollection, UploadRecord};
use crate::error::AppError;
use crate::grid::apply_collection_permissions;
use crate::metadata::{ImageMetadata, IndexedImageDocument};
use crate::schema::{INDEX_COLLECTIONS, INDEX_METADATA};
use crate::search::{BulkOutcome, SearchIndex};
use crate::session::{SessionPool, SessionTicket, WorkerId};
use crate::tasks::{CancellationFlag, ProgressSink};

/// Where an upload currently is. Transfers report `completed` out of
/// `total` archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Preparing,
    Chunking,
    Transferring { completed: usize, total: usize },
    Indexing,
    RecordingUpload,
    Done,
    Failed,
}

impl UploadPhase {
    /// Overall task fraction reported for this phase. Transfers dominate the
    /// wall clock, so they own the progress range.
    pub fn fraction(&self) -> f64 {
        match self {
            UploadPhase::Preparing | UploadPhase::Chunking => 0.0,
            UploadPhase::Transferring { completed, total } => {
                (*completed + 1) as f64 / (*total).max(1) as f64
            }
            UploadPhase::Indexing | UploadPhase::RecordingUpload | UploadPhase::Done => 1.0,
            UploadPhase::Failed => 0.0,
        }
    }
}

impl std::fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadPhase::Preparing => write!(f, "Preparing file set..."),
            UploadPhase::Chunking => write!(f, "Building archives before uploading..."),
            UploadPhase::Transferring { completed, total } => {
                write!(f, "Uploading archive part ({} / {})...", completed + 1, total)
            }
            UploadPhase::Indexing => write!(f, "Indexing image metadata..."),
            UploadPhase::RecordingUpload => write!(f, "Recording upload in the collection..."),
            UploadPhase::Done => write!(f, "Upload complete"),
            UploadPhase::Failed => write!(f, "Upload failed"),
        }
    }
}

/// Everything describing one requested bulk upload. Metadata for each file
/// arrives pre-parsed through the resolver; this pipeline never reads EXIF.
pub struct UploadJob {
    pub collection: ImageCollection,
    pub source_root: PathBuf,
    pub uploading_user: String,
    pub max_per_archive: usize,
    pub storage_method: String,
    pub metadata: Arc<dyn Fn(&Path) -> ImageMetadata + Send + Sync>,
}

#[derive(Debug)]
pub struct UploadOutcome {
    pub record: UploadRecord,
    pub bulk: BulkOutcome,
    pub archive_count: usize,
    pub file_count: usize,
}

/// Runs chunked bulk uploads: partition the file set, push each archive
/// through the worker's pooled grid session, index one document per file,
/// then append one upload record to the owning collection.
pub struct UploadPipeline {
    pool: Arc<SessionPool>,
    search: Arc<dyn SearchIndex>,
    handle: tokio::runtime::Handle,
    /// Grid directory under which `collections/<id>/uploads/` trees live.
    base_path: String,
}

impl UploadPipeline {
    pub fn new(
        pool: Arc<SessionPool>,
        search: Arc<dyn SearchIndex>,
        handle: tokio::runtime::Handle,
        base_path: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            search,
            handle,
            base_path: base_path.into(),
        }
    }

    fn uploads_dir(&self, collection_id: &str) -> String {
        format!("{}/collections/{}/uploads", self.base_path, collection_id)
    }

    /// Creates a collection's grid directories and applies its permission
    /// list, mapped onto the grid's ACLs. Called when a collection is saved
    /// by its owner.
    pub fn provision_collection(
        &self,
        worker: WorkerId,
        collection: &ImageCollection,
    ) -> Result<(), AppError> {
        let ticket = self.pool.acquire(worker)?;
        let result = self.pool.with_session(&ticket, |session| {
            let collection_dir = format!("{}/collections/{}", self.base_path, collection.id);
            let uploads_dir = format!("{}/uploads", collection_dir);
            session.make_directory(&collection_dir)?;
            apply_collection_permissions(session, &collection_dir, &collection.permissions, false)?;
            session.make_directory(&uploads_dir)?;
            apply_collection_permissions(session, &uploads_dir, &collection.permissions, true)?;
            Ok(())
        });
        self.pool.release(ticket);
        result
    }

    /// Runs one upload to completion. Blocking; meant for a background
    /// worker thread, with search calls bridged onto the runtime handle.
    pub fn run(
        &self,
        worker: WorkerId,
        job: &UploadJob,
        progress: &ProgressSink,
        cancel: &CancellationFlag,
    ) -> Result<UploadOutcome, AppError> {
        // Fatal precondition: no transfer may start without upload rights.
        if !job.collection.can_upload(&job.uploading_user) {
            return Err(AppError::PermissionDenied {
                user: job.uploading_user.clone(),
                collection: job.collection.id.clone(),
            });
        }

        log::info!(
            "Starting upload of {:?} to collection '{}'.",
            job.source_root,
            job.collection.id
        );
        let report = |phase: UploadPhase| progress.emit(phase.fraction(), phase.to_string());

        report(UploadPhase::Preparing);
        let files = collect_leaf_files(&job.source_root)?;
        if files.is_empty() {
            return Err(AppError::Generic(format!(
                "no media files found under {:?}",
                job.source_root
            )));
        }
        let file_count = files.len();

        report(UploadPhase::Chunking);
        let chunks = chunk_files(files.clone(), job.max_per_archive);
        let archives = build_archives(&job.source_root, &chunks)?;
        let archive_count = archives.len();

        let ticket = self.pool.acquire(worker)?;
        let transfer_result =
            self.transfer_archives(&ticket, job, archives, progress, cancel);
        self.pool.release(ticket);
        let (upload_dir, upload_date) = transfer_result?;

        // Only reached when every archive made it.
        report(UploadPhase::Indexing);
        let documents = files
            .iter()
            .map(|file| {
                let entry = entry_name(&job.source_root, file)?;
                let storage_path = format!("{}/{}", upload_dir, entry);
                let document = IndexedImageDocument::new(
                    storage_path,
                    job.collection.id.clone(),
                    (job.metadata)(file),
                );
                Ok((document.id(), to_value(&document)?))
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        let bulk = self
            .handle
            .block_on(self.search.bulk_index(INDEX_METADATA, documents))?;
        if !bulk.is_complete() {
            // Best effort: keep the successes, surface the rest in the log.
            log::warn!(
                "{} of {} metadata documents failed to index.",
                bulk.failures.len(),
                bulk.attempted()
            );
        }

        report(UploadPhase::RecordingUpload);
        let record = UploadRecord {
            upload_user: job.uploading_user.clone(),
            upload_date,
            image_count: file_count as i64,
            upload_path: upload_dir,
            storage_method: job.storage_method.clone(),
        };
        self.handle.block_on(self.search.append_to_list(
            INDEX_COLLECTIONS,
            &job.collection.id,
            "uploads",
            to_value(&record)?,
        ))?;

        report(UploadPhase::Done);
        log::info!(
            "Upload of {} files ({} archives) to collection '{}' complete.",
            file_count,
            archive_count,
            job.collection.id
        );
        Ok(UploadOutcome {
            record,
            bulk,
            archive_count,
            file_count,
        })
    }

    /// Transfers every archive sequentially into a fresh upload folder named
    /// by the grid server's clock plus the uploading user. Each staged
    /// archive is deleted after its transfer attempt, pass or fail.
    fn transfer_archives(
        &self,
        ticket: &SessionTicket,
        job: &UploadJob,
        archives: Vec<BuiltArchive>,
        progress: &ProgressSink,
        cancel: &CancellationFlag,
    ) -> Result<(String, DateTime<Utc>), AppError> {
        let total = archives.len();

        let upload_date = self
            .pool
            .with_session(ticket, |session| session.server_time())?;
        let folder_name = format!(
            "{} {}",
            upload_date.format("%Y-%m-%d %H-%M-%S"),
            job.uploading_user
        );
        let upload_dir = format!("{}/{}", self.uploads_dir(&job.collection.id), folder_name);

        self.pool
            .with_session(ticket, |session| session.make_directory(&upload_dir))?;

        for (index, archive) in archives.into_iter().enumerate() {
            if cancel.is_cancelled() {
                log::warn!(
                    "Upload to collection '{}' abandoned after {} of {} archives; transferred archives stay on the grid.",
                    job.collection.id,
                    index,
                    total
                );
                return Err(AppError::Cancelled {
                    completed: index,
                    total,
                });
            }

            let phase = UploadPhase::Transferring {
                completed: index,
                total,
            };
            progress.emit(phase.fraction(), phase.to_string());
            let remote_path = format!("{}/{}-{}.tar", upload_dir, folder_name, index);
            let result = self.pool.with_session(ticket, |session| {
                session.put_file(archive.path(), &remote_path)
            });
            // The staged temp file is released here whether or not the
            // transfer worked.
            drop(archive);
            if let Err(e) = result {
                return Err(AppError::ArchiveTransfer {
                    index: index + 1,
                    total,
                    message: e.to_string(),
                });
            }
        }

        Ok((upload_dir, upload_date))
    }
}
