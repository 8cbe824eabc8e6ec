use crate::areas::repository::Repository;
use crate::artifacts::midx::expire::expire_packs;
use crate::artifacts::midx::verify::verify_midx_file;
use crate::artifacts::midx::writer::{MidxWriteFlags, MidxWriteOptions, MidxWriter};
use crate::artifacts::midx::{MIDX_SIGNATURE, chunk_name};

#[derive(Debug, Clone, Default)]
pub struct MidxCommandOptions {
    pub preferred_pack: Option<String>,
    pub rev_index: bool,
}

impl MidxCommandOptions {
    fn write_options(&self) -> MidxWriteOptions {
        let mut flags = MidxWriteFlags::empty();
        flags.set(MidxWriteFlags::REV_INDEX, self.rev_index);

        MidxWriteOptions {
            flags,
            preferred_pack: self.preferred_pack.clone(),
        }
    }
}

impl Repository {
    pub fn multi_pack_index_write(&self, opts: &MidxCommandOptions) -> anyhow::Result<()> {
        let existing = self.multi_pack_index();

        let report = MidxWriter::new(
            self.objects_dir(),
            self.database().packs(),
            existing.as_deref(),
            opts.write_options(),
        )
        .write()?;

        self.close_multi_pack_index();

        for name in &report.dropped {
            writeln!(self.writer(), "dropped {name}")?;
        }

        Ok(())
    }

    pub fn multi_pack_index_verify(&self) -> anyhow::Result<()> {
        let report = verify_midx_file(self.objects_dir(), self.database().packs());

        self.write_verify_report("multi-pack-index", &report)
    }

    /// Delete the packs the multi-pack-index no longer takes any object from
    pub fn multi_pack_index_expire(&self, opts: &MidxCommandOptions) -> anyhow::Result<()> {
        let Some(midx) = self.multi_pack_index() else {
            tracing::debug!("no multi-pack-index to expire packs from");
            return Ok(());
        };

        let report = expire_packs(
            self.objects_dir(),
            self.database().packs(),
            &midx,
            opts.write_options(),
        )?;

        self.close_multi_pack_index();

        for name in &report.expired {
            writeln!(self.writer(), "expired {name}")?;
        }

        Ok(())
    }

    pub fn multi_pack_index_read(&self, show_objects: bool) -> anyhow::Result<()> {
        let midx = self
            .multi_pack_index()
            .ok_or_else(|| anyhow::anyhow!("could not load multi-pack-index"))?;

        writeln!(
            self.writer(),
            "header: {:08x} {} {} {} {}",
            MIDX_SIGNATURE,
            midx.version(),
            midx.hash_version(),
            midx.num_chunks(),
            midx.num_packs()
        )?;

        let chunks = midx
            .chunk_ids()
            .iter()
            .map(|id| format!(" {}", chunk_name(*id)))
            .collect::<String>();
        writeln!(self.writer(), "chunks:{chunks}")?;
        writeln!(self.writer(), "num_objects: {}", midx.num_objects())?;

        writeln!(self.writer(), "packs:")?;
        for name in midx.pack_names() {
            writeln!(self.writer(), "{name}")?;
        }
        writeln!(self.writer(), "object-dir: {}", self.objects_dir().display())?;

        if show_objects {
            for (oid, entry) in midx.entries()? {
                let pack = midx.pack_name(entry.pack_int_id).unwrap_or_default();
                writeln!(self.writer(), "{oid} {}\t{pack}", entry.offset)?;
            }
        }

        Ok(())
    }
}
