//! Command handlers.
//!
//! Each handler owns one subcommand end to end: parse the image reference,
//! open the right volume, perform the operation, render through the
//! formatter, and map every failure to exit code 1. The core never prints;
//! everything user-visible funnels through [`crate::output::Formatter`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::creator::{create_image, CreateFormat};
use crate::error::{DiskError, Result};
use crate::image::{
    detect_image_type, open_harddisk, open_volume, parse_image_path, ImageKind, ImagePath,
};
use crate::output::Formatter;
use crate::volume::Volume;
use crate::{
    has_wildcards, split_internal_path, ATTR_ARCHIVE, ATTR_DIRECTORY, ATTR_HIDDEN,
    ATTR_READ_ONLY, ATTR_SYSTEM,
};

/// Run a fallible handler and map errors to exit code 1.
fn run(fmt: &Formatter, body: impl FnOnce() -> Result<i32>) -> i32 {
    match body() {
        Ok(code) => code,
        Err(e) => {
            fmt.error(&e.to_string());
            1
        }
    }
}

fn parse_spec(spec: &str) -> Result<ImagePath> {
    parse_image_path(spec)
        .ok_or_else(|| DiskError::Disk(format!("invalid disk image path: {spec}")))
}

fn display_spec(ip: &ImagePath) -> String {
    let internal = ip.internal.as_deref().unwrap_or("");
    match ip.partition {
        Some(p) => format!("{}:{}:\\{}", ip.image, p, internal),
        None => format!("{}:\\{}", ip.image, internal),
    }
}

/// `info image[:partition]`
pub fn cmd_info(spec: &str, verbose: bool, fmt: &Formatter) -> i32 {
    run(fmt, || {
        let ip = parse_spec(spec)?;
        let kind = detect_image_type(&ip.image)?;

        if kind == ImageKind::VictorHardDisk {
            let disk = open_harddisk(&ip.image, true)?;
            match ip.partition {
                Some(p) => {
                    let stats = crate::info::fat12_report(disk.partition(p as isize)?)?;
                    fmt.fat12_info(&stats, verbose);
                }
                None => fmt.harddisk_info(&crate::info::harddisk_report(&disk)?),
            }
            return Ok(0);
        }

        let volume = open_volume(&ip.image, ip.partition, true)?;
        match volume.report()? {
            crate::info::VolumeReport::Fat12(stats) => fmt.fat12_info(&stats, verbose),
            crate::info::VolumeReport::Cpm(stats) => fmt.cpm_info(&stats),
        }
        Ok(0)
    })
}

/// `verify image[:partition]`; exit code 1 when verification fails.
pub fn cmd_verify(spec: &str, verbose: bool, fmt: &Formatter) -> i32 {
    run(fmt, || {
        let ip = parse_spec(spec)?;
        let kind = detect_image_type(&ip.image)?;

        let report = if kind == ImageKind::VictorHardDisk {
            let disk = open_harddisk(&ip.image, true)?;
            match ip.partition {
                Some(p) => disk.partition(p as isize)?.verify(verbose)?,
                None => crate::verify::verify_harddisk(&disk, verbose)?,
            }
        } else {
            open_volume(&ip.image, ip.partition, true)?.verify(verbose)?
        };

        fmt.verify_report(&report);
        Ok(if report.is_valid { 0 } else { 1 })
    })
}

/// `create output -t type [-l label] [-f]`
pub fn cmd_create(
    output: &str,
    type_name: &str,
    label: Option<&str>,
    force: bool,
    fmt: &Formatter,
) -> i32 {
    run(fmt, || {
        let format = CreateFormat::from_name(type_name).ok_or_else(|| {
            DiskError::Disk(format!(
                "unknown disk type: {type_name} (expected one of {})",
                CreateFormat::names().join(", ")
            ))
        })?;
        create_image(output, format, label, force)?;
        fmt.success(&format!("Created {}: {output}", format.description()));
        Ok(0)
    })
}

/// `list image[:partition][:\path] [-r]`
pub fn cmd_list(spec: &str, recursive: bool, fmt: &Formatter) -> i32 {
    run(fmt, || {
        let ip = parse_spec(spec)?;
        let kind = detect_image_type(&ip.image)?;

        if kind == ImageKind::VictorHardDisk && ip.partition.is_none() {
            let disk = open_harddisk(&ip.image, true)?;
            if recursive {
                for index in 0..disk.partition_count() {
                    if index > 0 && !fmt.is_json() {
                        println!();
                    }
                    let partition = disk.partition(index as isize)?;
                    let base = format!("{}:{index}:\\", ip.image);
                    let matches = Volume::find_matching(
                        partition,
                        &["*".to_string()],
                        true,
                    )?;
                    fmt.list_matches(&matches, &base);
                }
            } else {
                fmt.list_partitions(&crate::info::partition_summaries(&disk), &ip.image);
            }
            return Ok(0);
        }

        let volume = open_volume(&ip.image, ip.partition, true)?;
        let components = split_internal_path(ip.internal.as_deref().unwrap_or(""));
        let display = display_spec(&ip);

        if recursive {
            let mut pattern_path = components.clone();
            pattern_path.push("*".to_string());
            let matches = volume.find_matching(&pattern_path, true)?;
            fmt.list_matches(&matches, &display);
        } else if volume.type_name() == "Victor 9000 CP/M" {
            fmt.list_cpm_files(&volume.list_files(&components)?, &display);
        } else {
            fmt.list_files(&volume.list_files(&components)?, &display);
        }
        Ok(0)
    })
}

/// `copy source dest [-r]`; one side is an image reference, the other a
/// host filesystem path.
pub fn cmd_copy(source: &str, dest: &str, recursive: bool, fmt: &Formatter) -> i32 {
    run(fmt, || {
        let source_image = parse_image_path(source);
        let dest_image = parse_image_path(dest);

        match (source_image, dest_image) {
            (Some(src), None) if src.internal.is_some() => {
                copy_from_image(&src, dest, recursive, fmt)
            }
            (None, Some(dst)) if dst.internal.is_some() => {
                copy_to_image(source, &dst, recursive, fmt)
            }
            _ => Err(DiskError::Disk(
                "invalid source/destination: one must be image:path, one must be a filesystem path"
                    .into(),
            )),
        }
    })
}

fn copy_from_image(src: &ImagePath, dest: &str, recursive: bool, fmt: &Formatter) -> Result<i32> {
    let internal = src.internal.as_deref().unwrap_or("");
    let components = split_internal_path(internal);
    if components.is_empty() {
        return Err(DiskError::Disk("no file specified in image path".into()));
    }

    let volume = open_volume(&src.image, src.partition, true)?;
    let source_display = display_spec(src);

    if has_wildcards(internal) || recursive {
        let matches = volume.find_matching(&components, recursive)?;
        if matches.is_empty() {
            return Err(DiskError::NotFound(format!(
                "no files matching '{internal}'"
            )));
        }

        let dest_dir = PathBuf::from(dest);
        fs::create_dir_all(&dest_dir)?;

        // Matches are relative to the directory the pattern was anchored
        // in: the whole path for a bare directory, everything but the
        // leaf when the leaf is a pattern.
        let base: Vec<String> = if has_wildcards(internal) {
            components[..components.len() - 1].to_vec()
        } else {
            components.clone()
        };

        let mut total_files = 0;
        let mut total_bytes = 0usize;
        let mut copied = Vec::new();

        for (rel_path, record) in &matches {
            if record.is_directory {
                continue;
            }
            let read_path: Vec<String> = rel_path.split('\\').map(str::to_string).collect();

            // Mirror the image-side directory structure under dest.
            let mut dest_file = dest_dir.clone();
            for part in &read_path[..read_path.len() - 1] {
                dest_file.push(part);
            }
            fs::create_dir_all(&dest_file)?;
            dest_file.push(&read_path[read_path.len() - 1]);

            let mut full_path = base.clone();
            full_path.extend(read_path.iter().cloned());
            let data = volume.read_file(&full_path)?;
            fs::write(&dest_file, &data)?;

            total_files += 1;
            total_bytes += data.len();
            if !fmt.is_json() {
                println!("  {rel_path} -> {} ({} bytes)", dest_file.display(), data.len());
            }
            copied.push(serde_json::json!({
                "name": rel_path,
                "size": data.len(),
                "dest": dest_file.display().to_string(),
            }));
        }

        fmt.success_with(
            &format!("Copied {total_files} file(s), {total_bytes} bytes total"),
            serde_json::json!({
                "source": source_display,
                "dest": dest,
                "files": total_files,
                "bytes": total_bytes,
                "copied": copied,
            }),
        );
    } else {
        let data = volume.read_file(&components)?;
        let mut dest_path = PathBuf::from(dest);
        if dest_path.is_dir() {
            dest_path.push(&components[components.len() - 1]);
        } else if let Some(parent) = dest_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&dest_path, &data)?;

        fmt.success_with(
            &format!("Copied {} bytes", data.len()),
            serde_json::json!({
                "source": source_display,
                "dest": dest_path.display().to_string(),
                "bytes": data.len(),
            }),
        );
    }
    Ok(0)
}

fn copy_to_image(source: &str, dst: &ImagePath, recursive: bool, fmt: &Formatter) -> Result<i32> {
    let internal = dst.internal.as_deref().unwrap_or("");
    let components = split_internal_path(internal);
    if components.is_empty() {
        return Err(DiskError::Disk("no destination specified in image path".into()));
    }

    let source_path = Path::new(source);
    if !source_path.exists() {
        return Err(DiskError::NotFound(format!("source not found: {source}")));
    }

    let mut volume = open_volume(&dst.image, dst.partition, false)?;
    let dest_display = display_spec(dst);

    if source_path.is_dir() {
        if !recursive {
            return Err(DiskError::Disk(format!(
                "'{source}' is a directory; use recursive copy"
            )));
        }
        let (total_files, total_bytes) =
            copy_dir_to_image(source_path, volume.as_mut(), &components, fmt)?;
        volume.flush_volume()?;
        fmt.success_with(
            &format!("Copied {total_files} file(s), {total_bytes} bytes total"),
            serde_json::json!({
                "source": source,
                "dest": dest_display,
                "files": total_files,
                "bytes": total_bytes,
            }),
        );
    } else {
        let data = fs::read(source_path)?;
        volume.write_file(&components, &data)?;
        fmt.success_with(
            &format!("Copied {} bytes", data.len()),
            serde_json::json!({
                "source": source,
                "dest": dest_display,
                "bytes": data.len(),
            }),
        );
    }
    Ok(0)
}

/// Host directory -> image directory, creating directories as needed.
/// Host names are coerced into 8.3 by truncation.
fn copy_dir_to_image(
    source_dir: &Path,
    volume: &mut dyn Volume,
    dest_path: &[String],
    fmt: &Formatter,
) -> Result<(usize, usize)> {
    let mut total_files = 0;
    let mut total_bytes = 0;

    volume.create_directory(dest_path)?;

    for item in fs::read_dir(source_dir)? {
        let item = item?;
        let dos_name = dos_name_for(&item.file_name().to_string_lossy());
        let mut item_dest = dest_path.to_vec();
        item_dest.push(dos_name);

        let path = item.path();
        if path.is_dir() {
            let (files, bytes) = copy_dir_to_image(&path, volume, &item_dest, fmt)?;
            total_files += files;
            total_bytes += bytes;
        } else if path.is_file() {
            let data = fs::read(&path)?;
            match volume.write_file(&item_dest, &data) {
                Ok(()) => {
                    total_files += 1;
                    total_bytes += data.len();
                    if !fmt.is_json() {
                        println!(
                            "  {} -> {} ({} bytes)",
                            path.display(),
                            item_dest.join("\\"),
                            data.len()
                        );
                    }
                }
                Err(e) => {
                    if !fmt.is_json() {
                        println!("  Warning: failed to copy {}: {e}", path.display());
                    }
                }
            }
        }
    }
    Ok((total_files, total_bytes))
}

fn dos_name_for(name: &str) -> String {
    let upper = name.to_ascii_uppercase();
    if upper.len() <= 12 {
        return upper;
    }
    match upper.rsplit_once('.') {
        Some((stem, ext)) => format!(
            "{}.{}",
            &stem[..stem.len().min(8)],
            &ext[..ext.len().min(3)]
        ),
        None => upper[..8].to_string(),
    }
}

/// `delete image:\path [-r]`
pub fn cmd_delete(spec: &str, recursive: bool, fmt: &Formatter) -> i32 {
    run(fmt, || {
        let ip = parse_spec(spec)?;
        let internal = ip
            .internal
            .as_deref()
            .ok_or_else(|| DiskError::Disk("no file specified to delete".into()))?;
        let components = split_internal_path(internal);
        if components.is_empty() {
            return Err(DiskError::Disk("no file specified to delete".into()));
        }

        let mut volume = open_volume(&ip.image, ip.partition, false)?;
        let is_directory = volume
            .get_attributes(&components)
            .map(|attrs| attrs & ATTR_DIRECTORY != 0)
            .unwrap_or(false);

        if is_directory {
            volume.delete_directory(&components, recursive)?;
        } else {
            volume.delete_file(&components)?;
        }

        fmt.success_with(
            &format!("Deleted {internal}"),
            serde_json::json!({ "deleted": display_spec(&ip) }),
        );
        Ok(0)
    })
}

/// `mkdir image:\path`
pub fn cmd_mkdir(spec: &str, fmt: &Formatter) -> i32 {
    run(fmt, || {
        let ip = parse_spec(spec)?;
        let internal = ip
            .internal
            .as_deref()
            .ok_or_else(|| DiskError::Disk("no directory name specified".into()))?;
        let components = split_internal_path(internal);
        if components.is_empty() {
            return Err(DiskError::Disk("no directory name specified".into()));
        }

        let mut volume = open_volume(&ip.image, ip.partition, false)?;
        volume.create_directory(&components)?;
        volume.flush_volume()?;

        fmt.success_with(
            &format!("Created directory {internal}"),
            serde_json::json!({ "directory": display_spec(&ip) }),
        );
        Ok(0)
    })
}

/// `rmdir image:\path [-r]`
pub fn cmd_rmdir(spec: &str, recursive: bool, fmt: &Formatter) -> i32 {
    run(fmt, || {
        let ip = parse_spec(spec)?;
        let internal = ip
            .internal
            .as_deref()
            .ok_or_else(|| DiskError::Disk("no directory name specified".into()))?;
        let components = split_internal_path(internal);
        if components.is_empty() {
            return Err(DiskError::Disk("no directory name specified".into()));
        }

        let mut volume = open_volume(&ip.image, ip.partition, false)?;
        volume.delete_directory(&components, recursive)?;
        volume.flush_volume()?;

        fmt.success_with(
            &format!("Removed directory {internal}"),
            serde_json::json!({ "directory": display_spec(&ip) }),
        );
        Ok(0)
    })
}

/// `attr image:\path [+R -A ...]`; without modifications, just shows the
/// current attributes.
pub fn cmd_attr(spec: &str, modifications: &[String], fmt: &Formatter) -> i32 {
    run(fmt, || {
        let ip = parse_spec(spec)?;
        let internal = ip
            .internal
            .as_deref()
            .ok_or_else(|| DiskError::Disk("no file specified".into()))?;
        let components = split_internal_path(internal);
        if components.is_empty() {
            return Err(DiskError::Disk("no file specified".into()));
        }

        let has_mods = !modifications.is_empty();
        let mut volume = open_volume(&ip.image, ip.partition, !has_mods)?;
        let current = volume.get_attributes(&components)?;

        if has_mods {
            let updated = apply_attr_modifications(current, modifications);
            volume.set_attributes(&components, updated)?;
            volume.flush_volume()?;

            let old_str = format_attributes(current);
            let new_str = format_attributes(updated);
            if fmt.is_json() {
                fmt.success_with(
                    &format!("Updated attributes for {internal}"),
                    serde_json::json!({
                        "file": display_spec(&ip),
                        "old_attributes": old_str,
                        "new_attributes": new_str,
                    }),
                );
            } else {
                println!("{internal}: {old_str} -> {new_str}");
            }
        } else if fmt.is_json() {
            fmt.success_with(
                &format!("Attributes for {internal}"),
                serde_json::json!({
                    "file": display_spec(&ip),
                    "attributes": format_attributes(current),
                    "readonly": current & ATTR_READ_ONLY != 0,
                    "hidden": current & ATTR_HIDDEN != 0,
                    "system": current & ATTR_SYSTEM != 0,
                    "archive": current & ATTR_ARCHIVE != 0,
                }),
            );
        } else {
            println!("{internal}: {}", format_attributes(current));
        }
        Ok(0)
    })
}

/// `R-S-` style rendering of the four mutable attribute bits.
fn format_attributes(attrs: u8) -> String {
    let mut out = String::with_capacity(4);
    out.push(if attrs & ATTR_READ_ONLY != 0 { 'R' } else { '-' });
    out.push(if attrs & ATTR_HIDDEN != 0 { 'H' } else { '-' });
    out.push(if attrs & ATTR_SYSTEM != 0 { 'S' } else { '-' });
    out.push(if attrs & ATTR_ARCHIVE != 0 { 'A' } else { '-' });
    out
}

/// Apply `+X`/`-X` tokens. Unknown letters are ignored; the directory bit
/// cannot be named here, and the engine preserves it regardless.
fn apply_attr_modifications(current: u8, modifications: &[String]) -> u8 {
    let mut attrs = current;
    for modification in modifications {
        let mut chars = modification.chars();
        let (Some(op), Some(letter)) = (chars.next(), chars.next()) else {
            continue;
        };
        let bit = match letter.to_ascii_uppercase() {
            'R' => ATTR_READ_ONLY,
            'H' => ATTR_HIDDEN,
            'S' => ATTR_SYSTEM,
            'A' => ATTR_ARCHIVE,
            _ => continue,
        };
        match op {
            '+' => attrs |= bit,
            '-' => attrs &= !bit,
            _ => {}
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_modifications() {
        let attrs = apply_attr_modifications(0, &["+R".into(), "+H".into()]);
        assert_eq!(attrs, ATTR_READ_ONLY | ATTR_HIDDEN);
        let attrs = apply_attr_modifications(attrs, &["-R".into(), "+A".into()]);
        assert_eq!(attrs, ATTR_HIDDEN | ATTR_ARCHIVE);
        // Unknown letters and malformed tokens are ignored.
        let attrs = apply_attr_modifications(attrs, &["+X".into(), "R".into(), "".into()]);
        assert_eq!(attrs, ATTR_HIDDEN | ATTR_ARCHIVE);
    }

    #[test]
    fn attribute_rendering() {
        assert_eq!(format_attributes(0), "----");
        assert_eq!(format_attributes(ATTR_READ_ONLY | ATTR_SYSTEM), "R-S-");
    }

    #[test]
    fn dos_name_truncation() {
        assert_eq!(dos_name_for("readme.txt"), "README.TXT");
        assert_eq!(dos_name_for("averylongfilename.text"), "AVERYLON.TEX");
        assert_eq!(dos_name_for("averylongfilename"), "AVERYLON");
    }
}
