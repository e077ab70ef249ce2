//! Init image construction.
//!
//! The test payload is packed as a gzip-compressed cpio archive in the
//! `newc` format. The kernel unpacks concatenated archives in order, so the
//! payload is appended to an optional base initramfs (busybox and friends)
//! and its files take precedence.

use std::collections::BTreeSet;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

const NEWC_MAGIC: &str = "070701";
const TRAILER: &str = "TRAILER!!!";

const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const S_IFLNK: u32 = 0o120_000;

#[derive(Debug, Clone)]
struct Entry {
    path: String,
    mode: u32,
    data: Vec<u8>,
}

/// Builder for the payload archive.
#[derive(Debug, Clone, Default)]
pub struct InitImage {
    entries: Vec<Entry>,
    dirs: BTreeSet<String>,
}

fn normalize(path: &str) -> String {
    path.trim_start_matches('/').trim_end_matches('/').to_string()
}

impl InitImage {
    /// Creates an empty image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directory and any missing parents.
    pub fn add_dir(&mut self, path: &str, mode: u32) -> &mut Self {
        let path = normalize(path);
        if path.is_empty() || self.dirs.contains(&path) {
            return self;
        }
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.add_dir(parent, 0o755);
        }
        self.dirs.insert(path.clone());
        self.entries.push(Entry {
            path,
            mode: S_IFDIR | (mode & 0o7777),
            data: Vec::new(),
        });
        self
    }

    /// Adds a regular file, creating parent directories.
    pub fn add_file(&mut self, path: &str, data: impl Into<Vec<u8>>, mode: u32) -> &mut Self {
        let path = normalize(path);
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.add_dir(parent, 0o755);
        }
        self.entries.push(Entry {
            path,
            mode: S_IFREG | (mode & 0o7777),
            data: data.into(),
        });
        self
    }

    /// Adds a symbolic link.
    pub fn add_symlink(&mut self, path: &str, target: &str) -> &mut Self {
        let path = normalize(path);
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.add_dir(parent, 0o755);
        }
        self.entries.push(Entry {
            path,
            mode: S_IFLNK | 0o777,
            data: target.as_bytes().to_vec(),
        });
        self
    }

    /// Number of entries, directories included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the uncompressed `newc` archive.
    #[must_use]
    pub fn to_cpio(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            let ino = u32::try_from(index + 1).unwrap_or(u32::MAX);
            let nlink = if entry.mode & S_IFDIR == S_IFDIR { 2 } else { 1 };
            write_entry(&mut out, ino, entry.mode, nlink, &entry.path, &entry.data);
        }
        write_entry(&mut out, 0, 0, 1, TRAILER, &[]);
        out
    }

    /// Serializes and gzip-compresses the archive.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn to_gzip(&self) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.to_cpio())?;
        encoder.finish()
    }
}

fn write_entry(out: &mut Vec<u8>, ino: u32, mode: u32, nlink: u32, name: &str, data: &[u8]) {
    let namesize = name.len() + 1;
    let fields = [
        ino,
        mode,
        0, // uid
        0, // gid
        nlink,
        0, // mtime
        u32::try_from(data.len()).unwrap_or(u32::MAX),
        0, // devmajor
        0, // devminor
        0, // rdevmajor
        0, // rdevminor
        u32::try_from(namesize).unwrap_or(u32::MAX),
        0, // check
    ];
    out.extend_from_slice(NEWC_MAGIC.as_bytes());
    for field in fields {
        out.extend_from_slice(format!("{field:08X}").as_bytes());
    }
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    pad4(out);
    out.extend_from_slice(data);
    pad4(out);
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// Appends the payload archive to an optional base initramfs.
#[must_use]
pub fn assemble(base: Option<&[u8]>, payload: &[u8]) -> Vec<u8> {
    let mut image = Vec::with_capacity(base.map_or(0, <[u8]>::len) + payload.len());
    if let Some(base) = base {
        image.extend_from_slice(base);
        // Archives must start on a 4-byte boundary.
        pad4(&mut image);
    }
    image.extend_from_slice(payload);
    image
}
