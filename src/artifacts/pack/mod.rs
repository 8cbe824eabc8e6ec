//! Packs as seen through their `.idx` files
//!
//! Pack contents are never read here. The multi-pack-index only needs what a pack's
//! own index records (ids and offsets) plus a little file-system metadata about the
//! pack (modification time, `.keep` marker).

pub mod directory;
pub mod pack_index;

use std::path::{Path, PathBuf};

pub const PACK_DIR: &str = "pack";

/// `<objects>/pack`
pub fn pack_dir(objects_dir: &Path) -> PathBuf {
    objects_dir.join(PACK_DIR)
}

/// Name of a pack side file sharing the index's stem, e.g. `pack-1.idx` -> `pack-1.keep`
pub fn side_file_name(idx_name: &str, extension: &str) -> String {
    let stem = idx_name.strip_suffix(".idx").unwrap_or(idx_name);
    format!("{stem}.{extension}")
}

/// Accept `pack-1.idx`, `pack-1.pack`, or a path to either, and return `pack-1.idx`
pub fn normalize_idx_name(name: &str) -> String {
    let name = name.rsplit('/').next().unwrap_or(name);
    match name.strip_suffix(".pack") {
        Some(stem) => format!("{stem}.idx"),
        None if name.ends_with(".idx") => name.to_string(),
        None => format!("{name}.idx"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("pack-1.idx", "pack-1.idx")]
    #[case("pack-1.pack", "pack-1.idx")]
    #[case("objects/pack/pack-1.pack", "pack-1.idx")]
    #[case("pack-1", "pack-1.idx")]
    fn pack_names_normalize_to_the_index(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_idx_name(input), expected);
    }

    #[test]
    fn side_files_share_the_stem() {
        assert_eq!(side_file_name("pack-1.idx", "keep"), "pack-1.keep");
        assert_eq!(side_file_name("pack-1.idx", "pack"), "pack-1.pack");
    }
}
