use std::fs;
use std::path::Path;

use nom::bytes::complete::{tag, take_until};
use nom::number::complete::{le_i16, le_i32, le_u32, le_u64};
use nom::sequence::tuple;
use nom::IResult;
use rustc_hash::FxHashMap;
use walkdir::WalkDir;

use crate::{HashResolver, IndexError, Resolved};

/// `"WNI "` read as a little-endian u32.
const MAGIC: u32 = 0x2049_4E57;
const SAVE_VERSION: i16 = 1;

/// In-memory hash → name table built from `.wni` files.
///
/// Keys are masked when inserted; a query is masked the same way, so an
/// index built for a 60-bit title answers lookups for full 64-bit constants.
#[derive(Debug, Clone)]
pub struct PackageIndex {
    mask: u64,
    entries: FxHashMap<u64, (String, usize)>,
    kinds: Vec<String>,
}

struct Header {
    count: usize,
    compressed: usize,
    decompressed: usize,
}

fn header(input: &[u8]) -> IResult<&[u8], (u32, i16, i32, i32, i32)> {
    tuple((le_u32, le_i16, le_i32, le_i32, le_i32))(input)
}

fn record(input: &[u8]) -> IResult<&[u8], (u64, &[u8])> {
    let (input, hash) = le_u64(input)?;
    let (input, name) = take_until(&b"\0"[..])(input)?;
    let (input, _) = tag(&b"\0"[..])(input)?;
    Ok((input, (hash, name)))
}

fn parse_header(input: &[u8]) -> Result<(&[u8], Header), IndexError> {
    let (rest, (magic, _version, count, compressed, decompressed)) =
        header(input).map_err(|_| IndexError::Truncated)?;
    if magic != MAGIC {
        return Err(IndexError::BadMagic(magic));
    }
    let size = |v: i32| usize::try_from(v).map_err(|_| IndexError::NegativeSize);
    Ok((
        rest,
        Header {
            count: size(count)?,
            compressed: size(compressed)?,
            decompressed: size(decompressed)?,
        },
    ))
}

impl PackageIndex {
    pub fn new(mask: u64) -> Self {
        Self {
            mask,
            entries: FxHashMap::default(),
            kinds: Vec::new(),
        }
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add one entry. A later insert for the same masked hash replaces the
    /// earlier one.
    pub fn insert(&mut self, hash: u64, name: impl Into<String>, kind: &str) {
        let kind = self.kind_slot(kind);
        self.entries.insert(hash & self.mask, (name.into(), kind));
    }

    fn kind_slot(&mut self, kind: &str) -> usize {
        match self.kinds.iter().position(|k| k == kind) {
            Some(i) => i,
            None => {
                self.kinds.push(kind.to_string());
                self.kinds.len() - 1
            }
        }
    }

    /// Decode an index from memory. Entries are tagged with `kind`.
    pub fn load_bytes(&mut self, bytes: &[u8], kind: &str) -> Result<usize, IndexError> {
        let (rest, header) = parse_header(bytes)?;
        let block = rest.get(..header.compressed).ok_or(IndexError::Truncated)?;
        let raw = lz4_flex::block::decompress(block, header.decompressed)
            .map_err(|e| IndexError::Decompress(e.to_string()))?;

        let mut input = raw.as_slice();
        for _ in 0..header.count {
            let (rest, (hash, name)) = record(input).map_err(|_| IndexError::Truncated)?;
            self.insert(hash, String::from_utf8_lossy(name), kind);
            input = rest;
        }
        Ok(header.count)
    }

    /// Load one `.wni` file; its stem becomes the kind of every entry.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, IndexError> {
        let bytes = fs::read(path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let kind = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "hash".to_string());
        let count = self.load_bytes(&bytes, &kind)?;
        log::debug!("{}: {count} hash entries", path.display());
        Ok(count)
    }

    /// Load every `*.wni` under `dir`, recursively and in file-name order.
    /// A file that fails to load is logged and skipped.
    pub fn load_dir(&mut self, dir: &Path) -> usize {
        let mut loaded = 0;
        let files = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    log::warn!("package index walk: {err}");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "wni"));
        for entry in files {
            match self.load_file(entry.path()) {
                Ok(count) => loaded += count,
                Err(err) => log::warn!("error loading package file {}: {err}", entry.path().display()),
            }
        }
        loaded
    }

    /// Write every entry to `path` as a version-1 index.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let mut keys: Vec<&u64> = self.entries.keys().collect();
        keys.sort();

        let mut raw = Vec::new();
        for key in keys {
            let (name, _) = &self.entries[key];
            raw.extend_from_slice(&key.to_le_bytes());
            raw.extend_from_slice(name.as_bytes());
            raw.push(0);
        }
        let block = lz4_flex::block::compress(&raw);

        let mut out = Vec::with_capacity(18 + block.len());
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&SAVE_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as i32).to_le_bytes());
        out.extend_from_slice(&(block.len() as i32).to_le_bytes());
        out.extend_from_slice(&(raw.len() as i32).to_le_bytes());
        out.extend_from_slice(&block);
        fs::write(path, out).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl HashResolver for PackageIndex {
    fn resolve(&self, hash: u64, mask: u64) -> Option<Resolved<'_>> {
        let (name, kind) = self.entries.get(&(hash & mask & self.mask))?;
        Some(Resolved {
            name,
            kind: &self.kinds[*kind],
        })
    }
}
