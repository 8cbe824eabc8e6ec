//! Fanout table and sorted object-id lookup
//!
//! A fanout table holds 256 big-endian u32 counts: entry `b` is the number of ids whose
//! first byte is `<= b`. Together with the sorted lookup array it narrows any search to
//! the ids sharing the first byte, then a binary search finishes the job.
//!
//! ```text
//! fanout[b - 1] (0 when b == 0)        fanout[b]
//!        |                                 |
//!        v                                 v
//! [ ... | id, id, id (first byte b) ... | ... ]   lookup array
//! ```

use crate::artifacts::chunk::be32;
use crate::artifacts::format_error::FormatError;
use crate::artifacts::objects::OBJECT_ID_RAW_LENGTH;
use crate::artifacts::objects::object_id::ObjectId;
use byteorder::{NetworkEndian, WriteBytesExt};
use std::cmp::Ordering;
use std::io::Write;
use std::ops::Range;

pub const FANOUT_ENTRIES: usize = 256;
pub const FANOUT_SIZE: usize = FANOUT_ENTRIES * 4;

/// Borrowed view over a validated fanout chunk and its lookup chunk
#[derive(Debug, Clone, Copy)]
pub struct FanoutLookup<'a> {
    fanout: &'a [u8],
    lookup: &'a [u8],
}

impl<'a> FanoutLookup<'a> {
    /// Validate the pair of chunks
    ///
    /// The fanout chunk must be exactly 1024 bytes and the lookup chunk must hold
    /// exactly `fanout[255]` ids. Monotonicity is left to the verifiers.
    pub fn new(fanout: &'a [u8], lookup: &'a [u8]) -> Result<Self, FormatError> {
        if fanout.len() != FANOUT_SIZE {
            return Err(FormatError::corrupt(format!(
                "fanout chunk has {} bytes, expected {FANOUT_SIZE}",
                fanout.len()
            )));
        }

        let count = be32(fanout, FANOUT_SIZE - 4) as usize;
        if lookup.len() != count * OBJECT_ID_RAW_LENGTH {
            return Err(FormatError::corrupt(format!(
                "lookup chunk has {} bytes, fanout announces {count} ids",
                lookup.len()
            )));
        }

        Ok(FanoutLookup { fanout, lookup })
    }

    /// Rebuild a view over chunks that already went through [`FanoutLookup::new`]
    pub(crate) fn from_validated(fanout: &'a [u8], lookup: &'a [u8]) -> Self {
        debug_assert_eq!(fanout.len(), FANOUT_SIZE);
        FanoutLookup { fanout, lookup }
    }

    /// Number of ids, `fanout[255]`
    pub fn count(&self) -> u32 {
        self.fanout_at(FANOUT_ENTRIES - 1)
    }

    pub fn fanout_at(&self, index: usize) -> u32 {
        be32(self.fanout, index * 4)
    }

    /// Raw bytes of the id at `position`
    pub fn oid_bytes(&self, position: u32) -> &'a [u8] {
        let start = position as usize * OBJECT_ID_RAW_LENGTH;
        &self.lookup[start..start + OBJECT_ID_RAW_LENGTH]
    }

    pub fn oid_at(&self, position: u32) -> ObjectId {
        let mut raw = [0u8; OBJECT_ID_RAW_LENGTH];
        raw.copy_from_slice(self.oid_bytes(position));
        ObjectId::from_raw(raw)
    }

    /// Positions of the ids whose first byte is `first_byte`
    ///
    /// Clamped to the lookup size, so a corrupt fanout can only shrink the range.
    pub fn range(&self, first_byte: u8) -> Range<u32> {
        let count = self.count();
        let start = match first_byte {
            0 => 0,
            b => self.fanout_at(b as usize - 1),
        };
        let end = self.fanout_at(first_byte as usize);
        start.min(count)..end.min(count)
    }

    /// Position of `oid` in the lookup array
    pub fn locate(&self, oid: &ObjectId) -> Option<u32> {
        let Range { mut start, mut end } = self.range(oid.first_byte());
        let needle = oid.as_bytes().as_slice();

        while start < end {
            let mid = start + (end - start) / 2;
            match self.oid_bytes(mid).cmp(needle) {
                Ordering::Equal => return Some(mid),
                Ordering::Less => start = mid + 1,
                Ordering::Greater => end = mid,
            }
        }

        None
    }
}

/// Write the fanout table for a sorted slice of ids
pub fn write_fanout<W: Write + ?Sized>(out: &mut W, sorted: &[ObjectId]) -> anyhow::Result<()> {
    let mut count = 0usize;
    for bucket in 0..FANOUT_ENTRIES {
        while count < sorted.len() && sorted[count].first_byte() as usize <= bucket {
            count += 1;
        }
        out.write_u32::<NetworkEndian>(count as u32)?;
    }
    Ok(())
}

/// Write the lookup array for a sorted slice of ids
pub fn write_lookup<W: Write + ?Sized>(out: &mut W, sorted: &[ObjectId]) -> anyhow::Result<()> {
    for oid in sorted {
        oid.write_h40_to(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::btree_set;
    use proptest::prelude::*;

    fn encode(sorted: &[ObjectId]) -> (Vec<u8>, Vec<u8>) {
        let mut fanout = Vec::new();
        let mut lookup = Vec::new();
        write_fanout(&mut fanout, sorted).unwrap();
        write_lookup(&mut lookup, sorted).unwrap();
        (fanout, lookup)
    }

    #[test]
    fn empty_lookup_finds_nothing() {
        let (fanout, lookup) = encode(&[]);
        let table = FanoutLookup::new(&fanout, &lookup).unwrap();

        assert_eq!(table.count(), 0);
        assert_eq!(table.locate(&ObjectId::default()), None);
    }

    #[test]
    fn lookup_size_must_match_fanout_total() {
        let ids = [ObjectId::from_raw([3; 20])];
        let (fanout, _) = encode(&ids);

        assert!(FanoutLookup::new(&fanout, &[]).is_err());
        assert!(FanoutLookup::new(&fanout[..1020], &[0; 20]).is_err());
    }

    #[test]
    fn first_and_last_buckets_are_reachable() {
        let ids = [ObjectId::from_raw([0x00; 20]), ObjectId::from_raw([0xff; 20])];
        let (fanout, lookup) = encode(&ids);
        let table = FanoutLookup::new(&fanout, &lookup).unwrap();

        assert_eq!(table.locate(&ids[0]), Some(0));
        assert_eq!(table.locate(&ids[1]), Some(1));
        assert_eq!(table.range(0x00), 0..1);
        assert_eq!(table.range(0x80), 1..1);
    }

    proptest! {
        #[test]
        fn every_indexed_id_is_located_at_its_rank(
            raws in btree_set(proptest::array::uniform20(any::<u8>()), 0..200),
            candidate in proptest::array::uniform20(any::<u8>()),
        ) {
            let sorted = raws.iter().copied().map(ObjectId::from_raw).collect::<Vec<_>>();
            let (fanout, lookup) = encode(&sorted);
            let table = FanoutLookup::new(&fanout, &lookup).unwrap();

            prop_assert_eq!(table.count() as usize, sorted.len());
            for window in (0..FANOUT_ENTRIES).collect::<Vec<_>>().windows(2) {
                prop_assert!(table.fanout_at(window[0]) <= table.fanout_at(window[1]));
            }
            for (rank, oid) in sorted.iter().enumerate() {
                prop_assert_eq!(table.locate(oid), Some(rank as u32));
                prop_assert_eq!(table.oid_at(rank as u32), *oid);
            }

            let candidate = ObjectId::from_raw(candidate);
            prop_assert_eq!(table.locate(&candidate).is_some(), raws.contains(candidate.as_bytes()));
        }
    }
}
