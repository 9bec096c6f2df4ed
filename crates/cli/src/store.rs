//! File store rooted at a local directory.
//!
//! File ids are root-relative paths with `/` separators. Dot-directories are hidden
//! from listings and searches; `.history/` holds previous revisions when edit history
//! is enabled.

use std::{
    fs::Metadata,
    path::{Component, Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use stepline_engine::services::{FileContent, FileInfo, FileListing, FileQuery, FileSort, FileWrite};
use tokio::fs;
use tracing::debug;

const HISTORY_DIR: &str = ".history";

#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn read(&self, file_id: &str) -> Result<FileContent> {
        let relative = normalize(file_id)?;
        let full_path = self.root.join(&relative);
        let content = fs::read_to_string(&full_path)
            .await
            .with_context(|| format!("read {}", full_path.display()))?;
        let metadata = fs::metadata(&full_path).await?;
        Ok(FileContent {
            info: file_info(&relative, &metadata),
            content,
            encrypted: false,
        })
    }

    pub async fn find(&self, path: &str) -> Result<Option<FileInfo>> {
        let relative = normalize(path)?;
        match fs::metadata(self.root.join(&relative)).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(file_info(&relative, &metadata))),
            Ok(_) => Ok(None),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error).with_context(|| format!("stat {relative}")),
        }
    }

    pub async fn search(&self, query: &FileQuery) -> Result<Vec<FileInfo>> {
        let needle = query.query.to_lowercase();
        let mut matches = Vec::new();
        for (relative, metadata) in self.walk("").await? {
            let mut hit = file_name(&relative).to_lowercase().contains(&needle);
            if !hit && query.search_content {
                // Binary files are skipped rather than failing the search.
                if let Ok(content) = fs::read_to_string(self.root.join(&relative)).await {
                    hit = content.to_lowercase().contains(&needle);
                }
            }
            if hit {
                matches.push(file_info(&relative, &metadata));
            }
        }
        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    pub async fn list(&self, listing: &FileListing) -> Result<Vec<FileInfo>> {
        let folder = normalize(&listing.folder)?;
        let mut files: Vec<FileInfo> = self
            .walk(&folder)
            .await?
            .into_iter()
            .filter(|(relative, _)| parent_of(relative) == folder)
            .map(|(relative, metadata)| file_info(&relative, &metadata))
            .collect();
        match listing.sort {
            FileSort::Name => files.sort_by(|left, right| left.name.cmp(&right.name)),
            FileSort::Modified => files.sort_by(|left, right| right.modified_at.cmp(&left.modified_at)),
        }
        if let Some(limit) = listing.limit {
            files.truncate(limit);
        }
        Ok(files)
    }

    pub async fn folders(&self, folder: &str) -> Result<Vec<String>> {
        let folder = normalize(folder)?;
        let directory = self.root.join(&folder);
        let mut entries = fs::read_dir(&directory)
            .await
            .with_context(|| format!("list {}", directory.display()))?;
        let mut folders = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && entry.file_type().await?.is_dir() {
                folders.push(join(&folder, &name));
            }
        }
        folders.sort();
        Ok(folders)
    }

    /// Writes `write.content` to `file_id`, keeping the previous revision when asked.
    pub async fn write(&self, file_id: &str, write: &FileWrite) -> Result<FileInfo> {
        if write.encrypt {
            bail!("the directory store does not support encryption");
        }
        let relative = normalize(file_id)?;
        let full_path = self.root.join(&relative);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        if write.record_history && fs::try_exists(&full_path).await? {
            let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
            let backup = self.root.join(HISTORY_DIR).join(format!("{relative}.{stamp}"));
            if let Some(parent) = backup.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(&full_path, &backup).await?;
            debug!(path = %relative, backup = %backup.display(), "kept previous revision");
        }
        fs::write(&full_path, &write.content)
            .await
            .with_context(|| format!("write {}", full_path.display()))?;

        let metadata = fs::metadata(&full_path).await?;
        let mut info = file_info(&relative, &metadata);
        info.mime_type = write.mime_type.clone();
        Ok(info)
    }

    /// Every visible file below `folder`, depth first.
    async fn walk(&self, folder: &str) -> Result<Vec<(String, Metadata)>> {
        let mut files = Vec::new();
        let mut pending = vec![folder.to_string()];
        while let Some(current) = pending.pop() {
            let directory = self.root.join(&current);
            let mut entries = match fs::read_dir(&directory).await {
                Ok(entries) => entries,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(error).with_context(|| format!("list {}", directory.display())),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let relative = join(&current, &name);
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(relative);
                } else {
                    files.push((relative, metadata));
                }
            }
        }
        files.sort_by(|(left, _), (right, _)| left.cmp(right));
        Ok(files)
    }
}

/// Root-relative form of a path, refusing anything that escapes the root.
fn normalize(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for component in Path::new(path.trim()).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => bail!("path '{path}' leaves the store root"),
        }
    }
    Ok(parts.join("/"))
}

fn join(folder: &str, name: &str) -> String {
    if folder.is_empty() { name.to_string() } else { format!("{folder}/{name}") }
}

fn parent_of(relative: &str) -> &str {
    relative.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn file_name(relative: &str) -> &str {
    relative.rsplit('/').next().unwrap_or(relative)
}

fn file_info(relative: &str, metadata: &Metadata) -> FileInfo {
    FileInfo {
        id: relative.to_string(),
        name: file_name(relative).to_string(),
        path: relative.to_string(),
        mime_type: None,
        modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
        size: Some(metadata.len()),
    }
}
