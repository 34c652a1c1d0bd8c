//! Path resolution and file operations for FAT12 volumes.
//!
//! Paths arrive as lists of 8.3 components (already split and uppercased
//! by the caller); the empty path is the root directory. Resolution walks
//! the directory tree one component at a time, requiring everything but
//! the leaf to be a directory.

use log::debug;

use crate::entry::{DirEntry, DosStamp};
use crate::error::{DiskError, Result};
use crate::volume::{require_writable, DirHandle, Fat12Volume};
use crate::{
    has_wildcards, match_filename, validate_filename, ATTR_ARCHIVE, ATTR_DIRECTORY, SECTOR_SIZE,
};

impl Fat12Volume {
    /// Resolve a path to `(containing directory, entry)`.
    ///
    /// The entry is `None` when the path names a directory (including the
    /// empty path for the root); the handle then refers to that directory
    /// itself. For files the handle is the containing directory.
    pub fn resolve_path(&self, path: &[String]) -> Result<(DirHandle, Option<DirEntry>)> {
        if path.is_empty() {
            return Ok((DirHandle::Root, None));
        }

        let mut current = DirHandle::Root;
        for (i, component) in path.iter().enumerate() {
            let is_last = i == path.len() - 1;
            let (name, ext) = validate_filename(component)?;

            let found = self
                .read_directory(current)?
                .into_iter()
                .find(|e| e.matches(&name, &ext))
                .ok_or_else(|| DiskError::NotFound(format!("'{component}' not found")))?;

            if is_last {
                if found.is_directory() {
                    return Ok((DirHandle::Sub(found.first_cluster), None));
                }
                return Ok((current, Some(found)));
            }
            if !found.is_directory() {
                return Err(DiskError::NotFound(format!(
                    "'{component}' is not a directory"
                )));
            }
            current = DirHandle::Sub(found.first_cluster);
        }
        Ok((current, None))
    }

    /// Resolve a path that must name a directory.
    pub(crate) fn resolve_directory(&self, path: &[String]) -> Result<DirHandle> {
        match self.resolve_path(path)? {
            (handle, None) => Ok(handle),
            (_, Some(entry)) => Err(DiskError::NotFound(format!(
                "'{}' is not a directory",
                entry.full_name()
            ))),
        }
    }

    /// Find the entry a path names. Directory paths yield the directory's
    /// own `.` record, or a synthetic record for the root.
    pub fn find_entry(&self, path: &[String]) -> Result<DirEntry> {
        if path.is_empty() {
            return Err(DiskError::NotFound("empty path".into()));
        }
        match self.resolve_path(path)? {
            (_, Some(entry)) => Ok(entry),
            (handle, None) => {
                for entry in self.read_directory(handle)? {
                    if entry.name[0] == b'.' && entry.name[1] == b' ' {
                        return Ok(entry);
                    }
                }
                Ok(DirEntry::new(
                    [b' '; 8],
                    [b' '; 3],
                    ATTR_DIRECTORY,
                    handle.cluster().unwrap_or(0),
                    0,
                    DosStamp::default(),
                ))
            }
        }
    }

    /// Entries of the directory a path names; a path to a single file
    /// yields just that file.
    pub fn list_entries(&self, path: &[String]) -> Result<Vec<DirEntry>> {
        if path.is_empty() {
            return self.read_directory(DirHandle::Root);
        }
        match self.resolve_path(path)? {
            (_, Some(entry)) => Ok(vec![entry]),
            (handle, None) => self.read_directory(handle),
        }
    }

    /// Full contents of a file, truncated to its recorded size.
    pub fn read_file(&self, path: &[String]) -> Result<Vec<u8>> {
        let (_, entry) = self.resolve_path(path)?;
        let entry = entry
            .ok_or_else(|| DiskError::NotFound("path refers to a directory, not a file".into()))?;

        if entry.file_size == 0 {
            return Ok(Vec::new());
        }

        let mut data = Vec::with_capacity(entry.file_size as usize);
        for cluster in self.fat().follow_chain(entry.first_cluster)? {
            data.extend_from_slice(&self.read_cluster(cluster)?);
        }
        data.truncate(entry.file_size as usize);
        Ok(data)
    }

    /// Write a file, replacing any existing file of the same name.
    ///
    /// The allocation is feasibility-checked against the free count (plus
    /// whatever the replaced file will give back) before any directory or
    /// FAT state changes, so a full disk fails cleanly.
    pub fn write_file(&mut self, path: &[String], data: &[u8]) -> Result<()> {
        require_writable(self.device())?;
        let Some((filename, parent_path)) = path.split_last() else {
            return Err(DiskError::InvalidFilename("empty path".into()));
        };
        let (name, ext) = validate_filename(filename)?;
        let parent = self.resolve_directory(parent_path)?;

        let cluster_size = self.geometry().cluster_size;
        let needed = (data.len() + cluster_size - 1) / cluster_size;

        let existing = self.find_slot(parent, &name, &ext)?.map(|(_, e)| e);
        if let Some(old) = &existing {
            if old.is_directory() {
                return Err(DiskError::Disk(format!("'{filename}' is a directory")));
            }
            let reclaimed = self.fat().follow_chain(old.first_cluster)?.len();
            let free = self.fat().free_cluster_count() + reclaimed;
            if needed > free {
                return Err(DiskError::DiskFull { needed, free });
            }
            self.fat_mut().free_chain(old.first_cluster)?;
            self.delete_slot(parent, &name, &ext)?;
        }

        let clusters = self.fat_mut().allocate_chain(needed)?;
        debug!(
            "writing {} bytes to {} across {} cluster(s)",
            data.len(),
            filename,
            clusters.len()
        );

        let mut offset = 0;
        for &cluster in &clusters {
            let first_sector = self.cluster_to_sector(cluster);
            for i in 0..self.geometry().sectors_per_cluster {
                let mut sector = [0u8; SECTOR_SIZE];
                if offset < data.len() {
                    let end = (offset + SECTOR_SIZE).min(data.len());
                    sector[..end - offset].copy_from_slice(&data[offset..end]);
                }
                self.write_sector(first_sector + i, &sector)?;
                offset += SECTOR_SIZE;
            }
        }

        let entry = DirEntry::new(
            name,
            ext,
            ATTR_ARCHIVE,
            clusters.first().copied().unwrap_or(0),
            data.len() as u32,
            DosStamp::now(),
        );
        let slot = self.find_free_slot(parent)?;
        self.write_entry(slot, &entry)?;

        self.flush()
    }

    /// Delete a file: free its chain, then stamp its slot deleted.
    pub fn delete_file(&mut self, path: &[String]) -> Result<()> {
        require_writable(self.device())?;
        let Some((filename, parent_path)) = path.split_last() else {
            return Err(DiskError::InvalidFilename("empty path".into()));
        };
        let (name, ext) = validate_filename(filename)?;
        let parent = self.resolve_directory(parent_path)?;

        let target = self
            .find_slot(parent, &name, &ext)?
            .map(|(_, e)| e)
            .ok_or_else(|| DiskError::NotFound(format!("file not found: {filename}")))?;
        if target.is_directory() {
            return Err(DiskError::Disk(format!(
                "'{filename}' is a directory, not a file"
            )));
        }

        if target.first_cluster > 0 {
            self.fat_mut().free_chain(target.first_cluster)?;
        }
        self.delete_slot(parent, &name, &ext)?;
        self.flush()
    }

    /// Replace the attribute byte of a file or directory. The directory
    /// bit always survives.
    pub fn set_attributes(&mut self, path: &[String], attributes: u8) -> Result<()> {
        require_writable(self.device())?;
        let Some((filename, parent_path)) = path.split_last() else {
            return Err(DiskError::InvalidFilename("empty path".into()));
        };
        let (name, ext) = validate_filename(filename)?;
        let parent = self.resolve_directory(parent_path)?;
        self.update_slot_attributes(parent, &name, &ext, attributes)?;
        self.flush()
    }

    /// Rename in place. Collisions with a live entry of the new name in
    /// the same directory are refused.
    pub fn rename_entry(&mut self, path: &[String], new_name: &str) -> Result<()> {
        require_writable(self.device())?;
        let Some((old_filename, parent_path)) = path.split_last() else {
            return Err(DiskError::InvalidFilename("empty path".into()));
        };
        let (old_name, old_ext) = validate_filename(old_filename)?;
        let (new_name, new_ext) = validate_filename(new_name)?;
        let parent = self.resolve_directory(parent_path)?;

        if (old_name, old_ext) != (new_name, new_ext)
            && self.find_slot(parent, &new_name, &new_ext)?.is_some()
        {
            return Err(DiskError::Disk(format!(
                "file already exists: {}",
                crate::dir::display_name(&new_name, &new_ext)
            )));
        }

        self.rename_slot(parent, &old_name, &old_ext, &new_name, &new_ext)?;
        self.flush()
    }

    /// Expand a path whose leaf may carry wildcards.
    ///
    /// Non-recursive matches are plain files in the base directory.
    /// Recursive walks descend every subdirectory, report the directories
    /// themselves, and join relative paths with backslashes.
    pub fn find_matching_files(
        &self,
        path: &[String],
        recursive: bool,
    ) -> Result<Vec<(String, DirEntry)>> {
        if path.is_empty() {
            return Ok(Vec::new());
        }

        let last = &path[path.len() - 1];
        let wildcard = has_wildcards(last);

        if !wildcard && !recursive {
            return match self.resolve_path(path) {
                Ok((_, Some(entry))) => Ok(vec![(entry.full_name(), entry)]),
                Ok((handle, None)) => Ok(self
                    .read_directory(handle)?
                    .into_iter()
                    .filter(|e| !e.is_dot_entry() && !e.is_directory())
                    .map(|e| (e.full_name(), e))
                    .collect()),
                Err(DiskError::NotFound(_)) => Ok(Vec::new()),
                Err(e) => Err(e),
            };
        }

        let (base_path, pattern) = if wildcard {
            (&path[..path.len() - 1], last.as_str())
        } else {
            (path, "*.*")
        };

        let base = match self.resolve_directory(base_path) {
            Ok(handle) => handle,
            Err(DiskError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut results = Vec::new();
        if recursive {
            self.walk_matching(base, "", pattern, &mut results)?;
        } else {
            for entry in self.read_directory(base)? {
                if entry.is_dot_entry() || entry.is_directory() {
                    continue;
                }
                if match_filename(pattern, &entry.full_name()) {
                    results.push((entry.full_name(), entry));
                }
            }
        }
        Ok(results)
    }

    fn walk_matching(
        &self,
        dir: DirHandle,
        prefix: &str,
        pattern: &str,
        results: &mut Vec<(String, DirEntry)>,
    ) -> Result<()> {
        for entry in self.read_directory(dir)? {
            if entry.is_dot_entry() {
                continue;
            }
            let rel = if prefix.is_empty() {
                entry.full_name()
            } else {
                format!("{prefix}\\{}", entry.full_name())
            };
            if entry.is_directory() {
                results.push((rel.clone(), entry));
                self.walk_matching(DirHandle::Sub(entry.first_cluster), &rel, pattern, results)?;
            } else if match_filename(pattern, &entry.full_name()) {
                results.push((rel, entry));
            }
        }
        Ok(())
    }
}
