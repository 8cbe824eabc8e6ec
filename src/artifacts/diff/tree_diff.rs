use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::tree::TreeEntry;
use crate::artifacts::store::ObjectStore;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum TreeChangeType {
    Added(TreeEntry),
    Deleted(TreeEntry),
    Modified { old: TreeEntry, new: TreeEntry },
}

impl TreeChangeType {
    pub fn from_entries(old: Option<TreeEntry>, new: Option<TreeEntry>) -> Option<Self> {
        match (old, new) {
            (None, Some(new)) => Some(TreeChangeType::Added(new)),
            (Some(old), None) => Some(TreeChangeType::Deleted(old)),
            (Some(old), Some(new)) if old != new => Some(TreeChangeType::Modified { old, new }),
            _ => None,
        }
    }
}

/// Changes keyed by slash-separated path
pub type ChangeSet = BTreeMap<String, TreeChangeType>;
type TreeEntryMap = BTreeMap<String, TreeEntry>;

/// Recursive comparison of two trees down to non-tree entries
///
/// With a limit set, the walk stops descending as soon as more than `limit` changes
/// have been recorded and the diff is flagged as truncated.
#[derive(Debug)]
pub struct TreeDiff<'s, S: ObjectStore + ?Sized> {
    store: &'s S,
    change_set: ChangeSet,
    limit: Option<usize>,
    truncated: bool,
}

impl<'s, S: ObjectStore + ?Sized> TreeDiff<'s, S> {
    pub fn new(store: &'s S) -> Self {
        TreeDiff {
            store,
            change_set: BTreeMap::new(),
            limit: None,
            truncated: false,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.change_set
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn compare_oids(
        &mut self,
        old: Option<&ObjectId>,
        new: Option<&ObjectId>,
        prefix: &str,
    ) -> anyhow::Result<()> {
        if old == new || self.truncated {
            return Ok(());
        }

        let old_tree_entries = self.inflate_oid_to_tree_entries(old)?;
        let new_tree_entries = self.inflate_oid_to_tree_entries(new)?;

        self.detect_deletions(&old_tree_entries, &new_tree_entries, prefix)?;
        self.detect_additions(&old_tree_entries, &new_tree_entries, prefix)?;

        Ok(())
    }

    fn inflate_oid_to_tree_entries(&self, oid: Option<&ObjectId>) -> anyhow::Result<TreeEntryMap> {
        match oid {
            None => Ok(BTreeMap::new()),
            Some(oid) => Ok(self.store.read_tree(oid)?.into_named_entries()),
        }
    }

    fn record(&mut self, path: String, change: TreeChangeType) {
        self.change_set.insert(path, change);

        if let Some(limit) = self.limit
            && self.change_set.len() > limit
        {
            self.truncated = true;
        }
    }

    fn detect_deletions(
        &mut self,
        old: &TreeEntryMap,
        new: &TreeEntryMap,
        prefix: &str,
    ) -> anyhow::Result<()> {
        for (name, entry) in old {
            if self.truncated {
                break;
            }

            let path = join(prefix, name);
            let other = new.get(name);

            if other == Some(entry) {
                continue;
            }

            let tree_a_oid = entry.is_tree().then_some(&entry.oid);
            let tree_b_oid = other.filter(|other| other.is_tree()).map(|other| &other.oid);

            self.compare_oids(tree_a_oid, tree_b_oid, &path)?;

            let blob_a = (!entry.is_tree()).then_some(*entry);
            let blob_b = other.filter(|other| !other.is_tree()).copied();

            if let Some(change_type) = TreeChangeType::from_entries(blob_a, blob_b) {
                self.record(path, change_type);
            }
        }

        Ok(())
    }

    fn detect_additions(
        &mut self,
        old: &TreeEntryMap,
        new: &TreeEntryMap,
        prefix: &str,
    ) -> anyhow::Result<()> {
        for (name, entry) in new {
            if self.truncated {
                break;
            }
            if old.contains_key(name) {
                continue;
            }

            let path = join(prefix, name);
            if entry.is_tree() {
                self.compare_oids(None, Some(&entry.oid), &path)?;
            } else {
                self.record(path, TreeChangeType::Added(*entry));
            }
        }

        Ok(())
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
