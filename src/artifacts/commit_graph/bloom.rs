//! Changed-path Bloom filters
//!
//! Each commit gets a small bit vector approximating the set of paths it changed
//! relative to its first parent (every leading directory included). A query for a path
//! can answer "definitely not changed" or "maybe changed"; false negatives are never
//! allowed.
//!
//! Keys are derived from two murmur3 hashes of the path: `hash_i = h0 + i * h1` for
//! `i` in `0..num_hashes`, and each hash sets bit `hash_i % (len * 8)`, addressed
//! least-significant bit first within a byte.

use crate::artifacts::chunk::be32;
use crate::artifacts::diff::tree_diff::TreeDiff;
use crate::artifacts::objects::commit::Commit;
use crate::artifacts::store::ObjectStore;
use byteorder::{NetworkEndian, WriteBytesExt};
use std::collections::BTreeSet;
use std::io::Write;

pub const DEFAULT_NUM_HASHES: u32 = 7;
pub const DEFAULT_BITS_PER_ENTRY: u32 = 10;
pub const DEFAULT_MAX_CHANGED_PATHS: u32 = 512;

/// Hash version, hash count, bits per entry
pub const BLOOM_HEADER_SIZE: usize = 12;

const SEED0: u32 = 0x293a_e76f;
const SEED1: u32 = 0x7e64_6e2c;
const BITS_PER_WORD: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomSettings {
    /// 1 reproduces the historical sign-extending murmur3, 2 is the corrected one
    pub hash_version: u32,
    pub num_hashes: u32,
    pub bits_per_entry: u32,
    /// Not stored on disk; only governs filter computation
    pub max_changed_paths: u32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        BloomSettings {
            hash_version: 1,
            num_hashes: DEFAULT_NUM_HASHES,
            bits_per_entry: DEFAULT_BITS_PER_ENTRY,
            max_changed_paths: DEFAULT_MAX_CHANGED_PATHS,
        }
    }
}

impl BloomSettings {
    /// Parse the BDAT header; unknown hash versions yield `None`
    pub fn from_header(data: &[u8]) -> Option<Self> {
        if data.len() < BLOOM_HEADER_SIZE {
            return None;
        }

        let settings = BloomSettings {
            hash_version: be32(data, 0),
            num_hashes: be32(data, 4),
            bits_per_entry: be32(data, 8),
            max_changed_paths: DEFAULT_MAX_CHANGED_PATHS,
        };

        match settings.hash_version {
            1 | 2 if settings.num_hashes > 0 => Some(settings),
            _ => None,
        }
    }

    pub fn write_header<W: Write + ?Sized>(&self, out: &mut W) -> anyhow::Result<()> {
        out.write_u32::<NetworkEndian>(self.hash_version)?;
        out.write_u32::<NetworkEndian>(self.num_hashes)?;
        out.write_u32::<NetworkEndian>(self.bits_per_entry)?;
        Ok(())
    }

    /// Whether filters built with `other` can be queried with keys built from `self`
    pub fn is_compatible_with(&self, other: &BloomSettings) -> bool {
        self.hash_version == other.hash_version
            && self.num_hashes == other.num_hashes
            && self.bits_per_entry == other.bits_per_entry
    }
}

/// 32-bit murmur3
///
/// `sign_extend` widens every byte as a signed char before mixing, which is what the
/// version 1 filters on disk were computed with. It only matters for bytes >= 0x80.
pub fn murmur3_seeded(mut seed: u32, data: &[u8], sign_extend: bool) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;
    const R1: u32 = 15;
    const R2: u32 = 13;
    const M: u32 = 5;
    const N: u32 = 0xe654_6b64;

    let widen = |byte: u8| -> u32 {
        if sign_extend {
            byte as i8 as i32 as u32
        } else {
            byte as u32
        }
    };

    let mut blocks = data.chunks_exact(4);
    for block in blocks.by_ref() {
        let mut k = widen(block[0])
            | widen(block[1]) << 8
            | widen(block[2]) << 16
            | widen(block[3]) << 24;
        k = k.wrapping_mul(C1).rotate_left(R1).wrapping_mul(C2);

        seed ^= k;
        seed = seed.rotate_left(R2).wrapping_mul(M).wrapping_add(N);
    }

    let tail = blocks.remainder();
    let mut k1 = 0u32;
    if tail.len() >= 3 {
        k1 ^= widen(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        k1 ^= widen(tail[1]) << 8;
    }
    if let Some(&first) = tail.first() {
        k1 ^= widen(first);
        k1 = k1.wrapping_mul(C1).rotate_left(R1).wrapping_mul(C2);
        seed ^= k1;
    }

    seed ^= data.len() as u32;
    seed ^= seed >> 16;
    seed = seed.wrapping_mul(0x85eb_ca6b);
    seed ^= seed >> 13;
    seed = seed.wrapping_mul(0xc2b2_ae35);
    seed ^= seed >> 16;

    seed
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomKey {
    hashes: Vec<u32>,
}

impl BloomKey {
    pub fn new(path: &str, settings: &BloomSettings) -> Self {
        let sign_extend = settings.hash_version == 1;
        let hash0 = murmur3_seeded(SEED0, path.as_bytes(), sign_extend);
        let hash1 = murmur3_seeded(SEED1, path.as_bytes(), sign_extend);

        let hashes = (0..settings.num_hashes)
            .map(|i| hash0.wrapping_add(i.wrapping_mul(hash1)))
            .collect();

        BloomKey { hashes }
    }

    /// Keys for `path` and each of its leading directories
    pub fn for_path_and_parents(path: &str, settings: &BloomSettings) -> Vec<Self> {
        let path = path.trim_end_matches('/');
        let mut keys = vec![BloomKey::new(path, settings)];

        keys.extend(
            path.match_indices('/')
                .map(|(at, _)| BloomKey::new(&path[..at], settings)),
        );
        keys
    }

    pub fn hashes(&self) -> &[u32] {
        &self.hashes
    }
}

fn bit_position(hash: u32, filter_len: usize) -> (usize, u8) {
    let position = hash as u64 % (filter_len as u64 * BITS_PER_WORD);
    ((position / BITS_PER_WORD) as usize, 1 << (position % BITS_PER_WORD))
}

/// Check a key against raw filter bytes
///
/// An empty filter carries no information and answers "maybe".
pub fn filter_contains(filter: &[u8], key: &BloomKey) -> bool {
    if filter.is_empty() {
        return true;
    }

    key.hashes.iter().all(|&hash| {
        let (byte, mask) = bit_position(hash, filter.len());
        filter[byte] & mask != 0
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    data: Vec<u8>,
}

impl BloomFilter {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        BloomFilter { data }
    }

    fn with_len(len: usize) -> Self {
        BloomFilter { data: vec![0; len] }
    }

    /// The one-byte all-ones filter stored for commits with too many changes
    pub fn truncated_large() -> Self {
        BloomFilter { data: vec![0xff] }
    }

    /// The one-byte all-zeroes filter stored for commits with no changes
    pub fn truncated_empty() -> Self {
        BloomFilter { data: vec![0x00] }
    }

    pub fn add_key(&mut self, key: &BloomKey) {
        let len = self.data.len();
        for &hash in &key.hashes {
            let (byte, mask) = bit_position(hash, len);
            self.data[byte] |= mask;
        }
    }

    pub fn contains(&self, key: &BloomKey) -> bool {
        filter_contains(&self.data, key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// How a filter came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Computed,
    TruncatedEmpty,
    TruncatedLarge,
}

/// Build a filter over `paths` and all of their leading directories
pub fn filter_for_paths<'p>(
    paths: impl IntoIterator<Item = &'p str>,
    settings: &BloomSettings,
) -> (BloomFilter, FilterOutcome) {
    let mut entries = BTreeSet::new();
    for path in paths {
        entries.insert(path);
        entries.extend(path.match_indices('/').map(|(at, _)| &path[..at]));
    }

    if entries.len() > settings.max_changed_paths as usize {
        return (BloomFilter::truncated_large(), FilterOutcome::TruncatedLarge);
    }

    let len = (entries.len() as u64 * settings.bits_per_entry as u64).div_ceil(BITS_PER_WORD);
    if len == 0 {
        return (BloomFilter::truncated_empty(), FilterOutcome::TruncatedEmpty);
    }

    let mut filter = BloomFilter::with_len(len as usize);
    for entry in entries {
        filter.add_key(&BloomKey::new(entry, settings));
    }

    (filter, FilterOutcome::Computed)
}

/// Filter of the paths `commit` changed against its first parent
///
/// Root commits are compared against the empty tree.
pub fn compute_filter<S: ObjectStore + ?Sized>(
    store: &S,
    commit: &Commit,
    settings: &BloomSettings,
) -> anyhow::Result<(BloomFilter, FilterOutcome)> {
    let parent_tree = match commit.parent() {
        Some(parent) => Some(*store.read_commit(parent)?.tree_oid()),
        None => None,
    };

    let mut diff = TreeDiff::new(store).with_limit(settings.max_changed_paths as usize);
    diff.compare_oids(parent_tree.as_ref(), Some(commit.tree_oid()), "")?;

    if diff.is_truncated() {
        return Ok((BloomFilter::truncated_large(), FilterOutcome::TruncatedLarge));
    }

    Ok(filter_for_paths(
        diff.changes().keys().map(String::as_str),
        settings,
    ))
}

/// Counters reported after a write that computed filters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BloomStats {
    pub computed: u32,
    pub reused: u32,
    pub not_computed: u32,
    pub truncated_empty: u32,
    pub truncated_large: u32,
}

impl BloomStats {
    pub fn record(&mut self, outcome: FilterOutcome) {
        self.computed += 1;
        match outcome {
            FilterOutcome::Computed => {}
            FilterOutcome::TruncatedEmpty => self.truncated_empty += 1,
            FilterOutcome::TruncatedLarge => self.truncated_large += 1,
        }
    }
}
