//! Whether a device or image is currently mounted.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

pub const MOUNT_TABLES: [&str; 2] = ["/proc/mounts", "/etc/mtab"];

/// Look `path` up in the system mount table. An unreadable table counts as not mounted.
pub fn is_mounted<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    let Some(table) = MOUNT_TABLES.iter().find_map(|t| fs::read_to_string(t).ok()) else {
        debug!("No readable mount table");
        return false;
    };
    mounted_in(&table, path, |loop_name| {
        fs::read_to_string(format!("/sys/block/{loop_name}/loop/backing_file"))
            .ok()
            .map(|s| PathBuf::from(s.trim_end()))
    })
}

/// Look `path` up in the text of a mount table; `backing` maps a loop device name to its file
pub fn mounted_in<F>(table: &str, path: &Path, backing: F) -> bool
where
    F: Fn(&str) -> Option<PathBuf>,
{
    let target = canonical(path);
    for line in table.lines() {
        let Some(source) = line.split_whitespace().next() else {
            continue;
        };
        if !source.starts_with('/') {
            continue;
        }
        let source = unescape(source);
        if canonical(Path::new(&source)) == target {
            debug!("{} is mounted as {source}", path.display());
            return true;
        }
        let Some(loop_name) = source.strip_prefix("/dev/") else {
            continue;
        };
        if !loop_name.starts_with("loop") {
            continue;
        }
        if let Some(file) = backing(loop_name) {
            if canonical(&file) == target {
                debug!("{} backs {source}", path.display());
                return true;
            }
        }
    }
    false
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Undo the octal escapes of blanks in mount table fields
fn unescape(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
proc /proc proc rw,nosuid 0 0
/dev/sda1 / ext4 rw,relatime 0 0
/dev/loop3 /mnt/old sysv ro 0 0
/images/my\\040disk /mnt/disk sysv rw 0 0
";

    fn no_loops(_: &str) -> Option<PathBuf> {
        None
    }

    #[test]
    fn devices_in_table() {
        assert![mounted_in(TABLE, Path::new("/dev/sda1"), no_loops)];
        assert![!mounted_in(TABLE, Path::new("/dev/sdb1"), no_loops)];
        assert![!mounted_in(TABLE, Path::new("proc"), no_loops)];
        assert![mounted_in(TABLE, Path::new("/images/my disk"), no_loops)];
    }

    #[test]
    fn loop_backing_files() {
        let image = tempfile::NamedTempFile::new().unwrap();
        let backed = image.path().to_path_buf();
        let backing = |name: &str| (name == "loop3").then(|| backed.clone());
        assert![mounted_in(TABLE, image.path(), backing)];
        assert![!mounted_in(TABLE, image.path(), no_loops)];
    }
}
