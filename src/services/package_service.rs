//! SCORM Package Service - stores, replaces and garbage-collects packages
//!
//! Layout under `Config::packages_dir()`:
//!
//! ```text
//! packages/
//!   .staging/<uuid>/                  extraction in progress
//!   <item_id>/<sha256 prefix>-<uuid>/ one directory per accepted upload
//! ```
//!
//! An upload is validated and fully extracted before its record is written.
//! The record swap is the commit point; the superseded directory is removed
//! afterwards in a background task, and a failed removal is only logged.
//! Every upload gets a fresh directory, so re-uploading an earlier archive
//! never lands on a directory that is queued for removal.
//!
//! Uploads hold a shared lock from staging until commit and the garbage
//! collector takes it exclusively, so a sweep never sees a directory whose
//! record is not written yet.

use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{EventBus, LearningEvent};
use crate::config::Config;
use crate::db::models::{current_timestamp, runtime_versions, NewScormPackage, ScormPackageRecord};
use crate::db::{courses, packages, ProgressDb};
use crate::error::LearningError;

const MANIFEST_NAME: &str = "imsmanifest.xml";
const STAGING_DIR: &str = ".staging";

/// What the manifest and archive listing say about a package
#[derive(Debug, Clone, PartialEq)]
pub struct PackageManifest {
    pub runtime_version: &'static str,
    pub launch_href: String,
    pub title: Option<String>,
    pub file_count: usize,
    pub size_bytes: u64,
}

/// A file served out of a package
#[derive(Debug, Clone)]
pub struct PackageFile {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

/// Result of a garbage-collection sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

pub struct PackageService {
    db: Arc<ProgressDb>,
    config: Arc<Config>,
    events: Arc<EventBus>,
    /// Shared by in-flight uploads, exclusive for garbage collection
    sweep_lock: RwLock<()>,
}

impl PackageService {
    pub fn new(db: Arc<ProgressDb>, config: Arc<Config>, events: Arc<EventBus>) -> Self {
        Self {
            db,
            config,
            events,
            sweep_lock: RwLock::new(()),
        }
    }

    fn root(&self) -> PathBuf {
        self.config.packages_dir()
    }

    /// Current package record for an item
    pub fn get(&self, content_item_id: &str) -> Result<Option<ScormPackageRecord>, LearningError> {
        self.db.with_conn(|conn| packages::get_package(conn, content_item_id))
    }

    /// Validate, extract and commit a package archive.
    ///
    /// Without `replace`, an item that already has a package is a conflict.
    pub async fn upload(
        &self,
        content_item_id: &str,
        archive: Bytes,
        replace: bool,
    ) -> Result<ScormPackageRecord, LearningError> {
        check_segment(content_item_id)?;
        if archive.is_empty() {
            return Err(LearningError::InvalidArchive("archive is empty".into()));
        }
        if archive.len() as u64 > self.config.max_package_bytes {
            return Err(LearningError::PayloadTooLarge(format!(
                "archive is {} bytes, limit is {}",
                archive.len(),
                self.config.max_package_bytes
            )));
        }

        let existing = self.db.with_conn(|conn| {
            let item = courses::require_item(conn, content_item_id)?;
            if !item.is_scorm() {
                return Err(LearningError::InvalidInput(format!(
                    "content item {} is not a SCORM package",
                    content_item_id
                )));
            }
            packages::get_package(conn, content_item_id)
        })?;
        if existing.is_some() && !replace {
            return Err(LearningError::Conflict(format!(
                "package already exists for {}; upload with replace=true",
                content_item_id
            )));
        }

        let hash = hex::encode(Sha256::digest(&archive));
        let locator = format!(
            "{}/{}-{}",
            content_item_id,
            &hash[..16],
            Uuid::new_v4().simple()
        );
        let target = self.root().join(&locator);
        let staging = self.root().join(STAGING_DIR).join(Uuid::new_v4().to_string());

        let upload_guard = self.sweep_lock.read().await;

        // Extraction is CPU and file-system bound; keep it off the reactor
        let extract_to = staging.clone();
        let max_extracted = self.config.max_extracted_bytes;
        let manifest = tokio::task::spawn_blocking(move || {
            extract_package(&archive, &extract_to, max_extracted)
        })
        .await
        .map_err(|e| LearningError::Internal(format!("extraction task failed: {}", e)))?;
        let manifest = match manifest {
            Ok(m) => m,
            Err(e) => {
                remove_quietly(&staging).await;
                return Err(e);
            }
        };

        self.promote(&staging, &target).await?;

        let now = current_timestamp();
        let id = Uuid::new_v4().to_string();
        let record = NewScormPackage {
            id: &id,
            content_item_id,
            storage_locator: &locator,
            runtime_version: manifest.runtime_version,
            archive_hash: &hash,
            launch_href: &manifest.launch_href,
            title: manifest.title.as_deref(),
            file_count: manifest.file_count as i32,
            size_bytes: manifest.size_bytes as i64,
            uploaded_at: &now,
            updated_at: &now,
        };

        // The superseded locator is read in the commit transaction, so
        // concurrent replacements each clean up exactly what they displaced
        let committed = self.db.with_write_tx(|conn| {
            let current = packages::get_package(conn, content_item_id)?;
            let stored = match &current {
                Some(_) if !replace => Err(LearningError::Conflict(format!(
                    "package already exists for {}",
                    content_item_id
                ))),
                Some(_) => packages::replace_package(conn, &record),
                None => packages::insert_package(conn, &record),
            }?;
            Ok((stored, current.map(|p| p.storage_locator)))
        });
        let (committed, previous) = match committed {
            Ok(done) => done,
            Err(e) => {
                remove_quietly(&target).await;
                return Err(e);
            }
        };
        drop(upload_guard);

        info!(
            content_item_id = %content_item_id,
            locator = %committed.storage_locator,
            version = %committed.runtime_version,
            replaced = previous.is_some(),
            "Package stored"
        );
        self.events.emit(LearningEvent::PackageStored {
            content_item_id: content_item_id.to_string(),
            storage_locator: committed.storage_locator.clone(),
            replaced: previous.is_some(),
        });

        if let Some(old) = previous.filter(|old| *old != committed.storage_locator) {
            self.schedule_cleanup(old);
        }

        Ok(committed)
    }

    /// Move a staged extraction into its own fresh directory
    async fn promote(&self, staging: &Path, target: &Path) -> Result<(), LearningError> {
        let moved = async {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::rename(staging, target).await
        };
        if let Err(e) = moved.await {
            remove_quietly(staging).await;
            return Err(e.into());
        }
        debug!(target = ?target, "Package extracted into place");
        Ok(())
    }

    /// Remove a superseded package directory without blocking the caller.
    /// The directory is kept if a record points at it again by then.
    fn schedule_cleanup(&self, locator: String) {
        let dir = self.root().join(&locator);
        let db = self.db.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            match db.with_conn(packages::list_locators) {
                Ok(live) if live.contains(&locator) => {
                    debug!(locator = %locator, "Superseded package is referenced again; kept");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(locator = %locator, error = %e, "Could not confirm package is unreferenced; kept");
                    return;
                }
            }
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!(locator = %locator, "Superseded package removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(locator = %locator, error = %e, "Failed to remove superseded package");
                    events.emit(LearningEvent::PackageCleanupFailed {
                        storage_locator: locator,
                        error: e.to_string(),
                    });
                }
            }
        });
    }

    /// Read a file from the item's current package
    pub async fn read_file(
        &self,
        content_item_id: &str,
        relative_path: &str,
    ) -> Result<PackageFile, LearningError> {
        let record = self
            .get(content_item_id)?
            .ok_or_else(|| LearningError::NotFound(format!("package for {}", content_item_id)))?;

        let relative = safe_relative_path(relative_path)
            .ok_or_else(|| LearningError::InvalidInput(format!("invalid path: {}", relative_path)))?;
        let path = self.root().join(&record.storage_locator).join(relative);

        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LearningError::NotFound(format!("file {}", relative_path)));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(PackageFile {
            content_type: guess_content_type(relative_path),
            body,
        })
    }

    /// Remove package directories no record points at, plus abandoned staging
    /// directories. Failures are reported and logged, never returned.
    pub async fn garbage_collect(&self) -> Result<GcReport, LearningError> {
        let _sweeping = self.sweep_lock.write().await;
        let referenced: HashSet<String> = self
            .db
            .with_conn(packages::list_locators)?
            .into_iter()
            .collect();

        let root = self.root();
        let mut report = GcReport::default();
        if !tokio::fs::try_exists(&root).await? {
            return Ok(report);
        }

        let mut candidates = Vec::new();
        let mut items = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = items.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let item_name = entry.file_name().to_string_lossy().to_string();
            let mut versions = tokio::fs::read_dir(entry.path()).await?;
            while let Some(version) = versions.next_entry().await? {
                let locator = format!("{}/{}", item_name, version.file_name().to_string_lossy());
                if item_name == STAGING_DIR || !referenced.contains(&locator) {
                    candidates.push(locator);
                }
            }
        }

        for locator in candidates {
            match tokio::fs::remove_dir_all(root.join(&locator)).await {
                Ok(()) => report.removed.push(locator),
                // A superseded-package cleanup got there first
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(locator = %locator, error = %e, "Garbage collection failed to remove package");
                    report.failed.push(locator);
                }
            }
        }

        info!(removed = report.removed.len(), failed = report.failed.len(), "Package garbage collection done");
        Ok(report)
    }
}

async fn remove_quietly(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = ?dir, error = %e, "Failed to remove package directory");
        }
    }
}

/// Item ids become directory names; reject anything that is not a single segment
fn check_segment(segment: &str) -> Result<(), LearningError> {
    let ok = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment != STAGING_DIR
        && !segment.contains(['/', '\\', '\0']);
    if ok {
        Ok(())
    } else {
        Err(LearningError::InvalidInput(format!("invalid content item id: {}", segment)))
    }
}

/// Normal relative path with no parent or root components
fn safe_relative_path(path: &str) -> Option<PathBuf> {
    let path = Path::new(path.trim_start_matches('/'));
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Validate a package archive and extract it into `dest`.
///
/// The expanded size is capped at `max_extracted_bytes`, checked against the
/// declared entry sizes up front and against the bytes actually inflated.
pub fn extract_package(
    data: &[u8],
    dest: &Path,
    max_extracted_bytes: u64,
) -> Result<PackageManifest, LearningError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
    let too_large = || {
        LearningError::InvalidArchive(format!(
            "archive expands beyond {} bytes",
            max_extracted_bytes
        ))
    };

    // Validate every entry name before anything touches the disk
    let mut names = HashSet::new();
    let mut declared = 0u64;
    for i in 0..archive.len() {
        let file = archive.by_index(i)?;
        declared = declared.saturating_add(file.size());
        if declared > max_extracted_bytes {
            return Err(too_large());
        }
        let Some(path) = file.enclosed_name() else {
            return Err(LearningError::InvalidArchive(format!(
                "entry escapes the package root: {}",
                file.name()
            )));
        };
        if file.is_file() {
            names.insert(path.to_string_lossy().replace('\\', "/"));
        }
    }

    let manifest_xml = {
        let mut file = archive.by_name(MANIFEST_NAME).map_err(|_| {
            LearningError::InvalidArchive(format!("{} missing from archive root", MANIFEST_NAME))
        })?;
        let mut xml = String::new();
        file.by_ref()
            .take(max_extracted_bytes)
            .read_to_string(&mut xml)
            .map_err(|e| LearningError::InvalidArchive(format!("unreadable manifest: {}", e)))?;
        strip_comments(&xml)
    };

    let runtime_version = detect_runtime_version(&manifest_xml);
    let launch_href = launch_href(&manifest_xml)
        .ok_or_else(|| LearningError::InvalidArchive("manifest declares no launchable resource".into()))?;
    let launch_path = launch_href.split(['?', '#']).next().unwrap_or_default().to_string();
    if !names.contains(&launch_path) {
        return Err(LearningError::InvalidArchive(format!(
            "launch file {} is not in the archive",
            launch_path
        )));
    }

    std::fs::create_dir_all(dest)?;
    let mut file_count = 0;
    let mut size_bytes = 0u64;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let Some(relative) = file.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(relative);
        if file.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&out_path)?;
        let remaining = max_extracted_bytes - size_bytes;
        let written = std::io::copy(&mut file.by_ref().take(remaining.saturating_add(1)), &mut out)?;
        if written > remaining {
            return Err(too_large());
        }
        size_bytes += written;
        file_count += 1;
    }

    Ok(PackageManifest {
        runtime_version,
        launch_href,
        title: organization_title(&manifest_xml),
        file_count,
        size_bytes,
    })
}

/// Runtime version from `<schemaversion>`, falling back to the ADL 1.2 namespace
fn detect_runtime_version(xml: &str) -> &'static str {
    match tag_text(xml, "schemaversion") {
        Some(version) if version.contains("1.2") => runtime_versions::SCORM_12,
        Some(_) => runtime_versions::SCORM_2004,
        None if xml.contains("adlcp_rootv1p2") => runtime_versions::SCORM_12,
        None => runtime_versions::SCORM_2004,
    }
}

// The manifest is scanned rather than parsed. Comments are stripped first;
// CDATA sections and `xml:base` on resources are not interpreted.

/// Manifest text with `<!-- -->` comments removed. An unterminated comment
/// swallows the rest of the document.
fn strip_comments(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut rest = xml;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start + 4..].find("-->") {
            Some(end) => rest = &rest[start + 4 + end + 3..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Bodies of the start tags whose local name is `name`, in document order
fn start_tags<'a>(xml: &'a str, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    let mut rest = xml;
    std::iter::from_fn(move || {
        while let Some(open) = rest.find('<') {
            let after = &rest[open + 1..];
            let end = after.find('>')?;
            let body = &after[..end];
            rest = &after[end + 1..];
            let tag = body.split_whitespace().next().unwrap_or_default();
            let local = tag.trim_end_matches('/').rsplit(':').next().unwrap_or_default();
            if local.eq_ignore_ascii_case(name) {
                return Some(body);
            }
        }
        None
    })
}

/// Trimmed text of the first `<tag>` element holding plain text
fn tag_text(xml: &str, tag: &str) -> Option<String> {
    let mut rest = xml;
    while let Some(open) = rest.find('<') {
        rest = &rest[open + 1..];
        let end = rest.find('>')?;
        let name = rest[..end].split_whitespace().next().unwrap_or_default();
        let local = name.rsplit(':').next().unwrap_or_default();
        if local.eq_ignore_ascii_case(tag) && !rest[..end].ends_with('/') {
            let body = &rest[end + 1..];
            let close = body.find("</")?;
            let text = body[..close].trim();
            if !text.is_empty() && !text.contains('<') {
                return Some(text.to_string());
            }
        }
        rest = &rest[end + 1..];
    }
    None
}

/// Course title from the organization, not from LOM metadata
fn organization_title(xml: &str) -> Option<String> {
    let scope = ["<organization ", "<organization>"]
        .iter()
        .filter_map(|open| xml.find(open))
        .min()
        .map(|i| &xml[i..])?;
    tag_text(scope, "title")
}

/// Launch file: the resource the first organization item points at, else
/// the first resource that carries an `href`
fn launch_href(xml: &str) -> Option<String> {
    let referenced = start_tags(xml, "item").find_map(|body| attribute(body, "identifierref"));
    if let Some(id) = referenced {
        let href = start_tags(xml, "resource")
            .find(|body| attribute(body, "identifier").as_deref() == Some(id.as_str()))
            .and_then(|body| attribute(body, "href"));
        if href.is_some() {
            return href;
        }
    }
    start_tags(xml, "resource").find_map(|body| attribute(body, "href"))
}

/// Value of attribute `name`; matches only a whole attribute name
fn attribute(tag_body: &str, name: &str) -> Option<String> {
    let mut rest = tag_body;
    while let Some(pos) = rest.find(name) {
        let preceded_by_space = rest[..pos].ends_with(|c: char| c.is_whitespace());
        let after = rest[pos + name.len()..].trim_start();
        if preceded_by_space {
            if let Some(value) = after.strip_prefix('=') {
                let value = value.trim_start();
                let quote = value.chars().next()?;
                if quote == '"' || quote == '\'' {
                    let inner = &value[1..];
                    let close = inner.find(quote)?;
                    return Some(inner[..close].to_string());
                }
            }
        }
        rest = &rest[pos + name.len()..];
    }
    None
}

/// Guess MIME type from file extension
pub fn guess_content_type(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("xml") | Some("xsd") => "application/xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("swf") => "application/x-shockwave-flash",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
