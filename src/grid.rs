use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::collection::Permission;
use crate::error::AppError;

/// Credentials and addressing for the remote storage grid. Connectors for
/// real grids take one of these at construction; the password is supplied by
/// the caller, never stored in configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct GridCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub zone: String,
}

impl GridCredentials {
    pub fn from_config(config: &crate::config::AppConfig, password: impl Into<String>) -> Self {
        Self {
            host: config.grid_host.clone(),
            port: config.grid_port,
            username: config.grid_username.clone(),
            password: password.into(),
            zone: config.grid_zone.clone(),
        }
    }
}

/// The grid's three-level access model. `Own` is never granted remotely by
/// this system, it belongs to whoever created the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Read,
    Write,
    Own,
}

/// One authenticated, stateful connection to the storage grid. A session is
/// owned by exactly one worker at a time; the session pool enforces that.
pub trait GridSession: Send {
    /// Creates a directory; succeeds if it already exists.
    fn make_directory(&mut self, path: &str) -> Result<(), AppError>;

    /// Uploads one local file to the given remote path (directory + name).
    fn put_file(&mut self, local: &Path, remote_path: &str) -> Result<(), AppError>;

    fn list_directory(&self, path: &str) -> Result<Vec<String>, AppError>;

    /// Grants `level` on `path` to `username`, optionally recursively.
    fn set_access(
        &mut self,
        path: &str,
        username: &str,
        level: AccessLevel,
        recursive: bool,
    ) -> Result<(), AppError>;

    /// The grid server's clock, used to name upload folders consistently
    /// across uploading machines.
    fn server_time(&self) -> Result<DateTime<Utc>, AppError>;

    fn close(&mut self) -> Result<(), AppError>;
}

/// Opens sessions against one configured grid. Implementations carry the
/// authenticated account; the session pool calls `connect` once per worker.
pub trait GridConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn GridSession>, AppError>;
}

/// Maps collection permissions onto grid ACLs: upload implies write access,
/// read-only rows get read access, owner rows are skipped since the creator
/// already owns the path.
pub fn apply_collection_permissions(
    session: &mut dyn GridSession,
    path: &str,
    permissions: &[Permission],
    recursive: bool,
) -> Result<(), AppError> {
    for permission in permissions.iter().filter(|p| !p.owner) {
        let level = if permission.upload {
            AccessLevel::Write
        } else if permission.read {
            AccessLevel::Read
        } else {
            continue;
        };
        session.set_access(path, &permission.username, level, recursive)?;
    }
    Ok(())
}

/// A grid backed by a local directory tree. Used for development and tests;
/// remote paths map directly onto paths under `root`, and ACL grants are
/// recorded rather than enforced.
pub struct LocalDiskGrid {
    root: PathBuf,
    grants: Arc<Mutex<HashMap<String, Vec<(String, AccessLevel)>>>>,
}

impl LocalDiskGrid {
    fn resolve(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }
}

impl GridSession for LocalDiskGrid {
    fn make_directory(&mut self, path: &str) -> Result<(), AppError> {
        fs::create_dir_all(self.resolve(path))?;
        Ok(())
    }

    fn put_file(&mut self, local: &Path, remote_path: &str) -> Result<(), AppError> {
        let target = self.resolve(remote_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, target)?;
        Ok(())
    }

    fn list_directory(&self, path: &str) -> Result<Vec<String>, AppError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.resolve(path))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn set_access(
        &mut self,
        path: &str,
        username: &str,
        level: AccessLevel,
        _recursive: bool,
    ) -> Result<(), AppError> {
        self.grants
            .lock()
            .expect("grant map poisoned")
            .entry(path.to_string())
            .or_default()
            .push((username.to_string(), level));
        Ok(())
    }

    fn server_time(&self) -> Result<DateTime<Utc>, AppError> {
        Ok(Utc::now())
    }

    fn close(&mut self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Connector producing [`LocalDiskGrid`] sessions rooted at one directory.
pub struct LocalDiskConnector {
    root: PathBuf,
    grants: Arc<Mutex<HashMap<String, Vec<(String, AccessLevel)>>>>,
}

impl LocalDiskConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            grants: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The ACL grants recorded so far, for inspection in tests.
    pub fn grants_for(&self, path: &str) -> Vec<(String, AccessLevel)> {
        self.grants
            .lock()
            .expect("grant map poisoned")
            .get(path)
            .cloned()
            .unwrap_or_default()
    }
}

impl GridConnector for LocalDiskConnector {
    fn connect(&self) -> Result<Box<dyn GridSession>, AppError> {
        Ok(Box::new(LocalDiskGrid {
            root: self.root.clone(),
            grants: Arc::clone(&self.grants),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn local_grid_round_trips_files() {
        let root = tempfile::tempdir().unwrap();
        let connector = LocalDiskConnector::new(root.path());
        let mut session = connector.connect().unwrap();

        session.make_directory("/zone/home/user/uploads").unwrap();

        let mut local = tempfile::NamedTempFile::new().unwrap();
        local.write_all(b"archive bytes").unwrap();
        session
            .put_file(local.path(), "/zone/home/user/uploads/part-0.tar")
            .unwrap();

        let listed = session.list_directory("/zone/home/user/uploads").unwrap();
        assert_eq!(listed, vec!["part-0.tar".to_string()]);
    }

    #[test]
    fn credentials_come_from_config_plus_caller_password() {
        use crate::config::{AppConfig, IndexSettings};
        let settings = IndexSettings {
            shards: 1,
            replicas: 0,
        };
        let config = AppConfig {
            elasticsearch_url: "http://localhost:9200".into(),
            grid_host: "grid.example.org".into(),
            grid_port: 1247,
            grid_zone: "zone".into(),
            grid_username: "catalog".into(),
            grid_base_path: "/zone/home/drone_data".into(),
            grid_local_root: "./grid_data".into(),
            users_index: settings,
            metadata_index: settings,
            collections_index: settings,
            sites_index: settings,
            max_files_per_archive: 900,
            scroll_page_size: 50,
            background_workers: 4,
            immediate_task_cap: 25,
            log_level: "info".into(),
        };
        let credentials = GridCredentials::from_config(&config, "hunter2");
        assert_eq!(credentials.host, "grid.example.org");
        assert_eq!(credentials.port, 1247);
        assert_eq!(credentials.zone, "zone");
        assert_eq!(credentials.password, "hunter2");
    }

    #[test]
    fn permission_mapping_skips_owner_rows() {
        let root = tempfile::tempdir().unwrap();
        let connector = LocalDiskConnector::new(root.path());
        let mut session = connector.connect().unwrap();

        let permissions = vec![
            Permission::owner_of("owner"),
            Permission {
                username: "uploader".into(),
                read: true,
                upload: true,
                owner: false,
            },
            Permission {
                username: "viewer".into(),
                read: true,
                upload: false,
                owner: false,
            },
        ];
        apply_collection_permissions(session.as_mut(), "/c/uploads", &permissions, true).unwrap();

        let grants = connector.grants_for("/c/uploads");
        assert_eq!(
            grants,
            vec![
                ("uploader".to_string(), AccessLevel::Write),
                ("viewer".to_string(), AccessLevel::Read),
            ]
        );
    }
}
