use std::future::Future;
use std::sync::Arc;

use hashbrown::HashMap;
use rollup_common::Fr;
use tokio::sync::Mutex;

use crate::circuits::{AppendOnlyTreeSnapshot, Header, PartialStateReference};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MerkleTreeId {
    NoteHashTree,
    NullifierTree,
    PublicDataTree,
    L1ToL2MessageTree,
    Archive,
}

impl MerkleTreeId {
    pub const ALL: [MerkleTreeId; 5] = [
        MerkleTreeId::NoteHashTree,
        MerkleTreeId::NullifierTree,
        MerkleTreeId::PublicDataTree,
        MerkleTreeId::L1ToL2MessageTree,
        MerkleTreeId::Archive,
    ];
}

/// Access to the world-state trees a block is built against.
///
/// The orchestrator only calls these from its own synchronous call sites,
/// never from proof completion handlers.
pub trait MerkleTreeOperations: Send + Sync {
    fn get_tree_info(
        &self,
        tree: MerkleTreeId,
    ) -> impl Future<Output = anyhow::Result<AppendOnlyTreeSnapshot>> + Send;

    fn append_leaves(
        &self,
        tree: MerkleTreeId,
        leaves: &[Fr],
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Inserts the hash of `header` into the archive.
    fn update_archive(&self, header: &Header) -> impl Future<Output = anyhow::Result<()>> + Send;
}

impl<T: MerkleTreeOperations> MerkleTreeOperations for Arc<T> {
    fn get_tree_info(
        &self,
        tree: MerkleTreeId,
    ) -> impl Future<Output = anyhow::Result<AppendOnlyTreeSnapshot>> + Send {
        (**self).get_tree_info(tree)
    }

    fn append_leaves(
        &self,
        tree: MerkleTreeId,
        leaves: &[Fr],
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        (**self).append_leaves(tree, leaves)
    }

    fn update_archive(&self, header: &Header) -> impl Future<Output = anyhow::Result<()>> + Send {
        (**self).update_archive(header)
    }
}

/// Snapshot of the three trees transactions write to.
pub async fn get_partial_state<D: MerkleTreeOperations>(
    db: &D,
) -> anyhow::Result<PartialStateReference> {
    Ok(PartialStateReference {
        note_hash_tree: db.get_tree_info(MerkleTreeId::NoteHashTree).await?,
        nullifier_tree: db.get_tree_info(MerkleTreeId::NullifierTree).await?,
        public_data_tree: db.get_tree_info(MerkleTreeId::PublicDataTree).await?,
    })
}

/// World state kept entirely in memory.
///
/// Only tree snapshots are tracked: appending folds the leaves into the
/// snapshot root and discards them.
#[derive(Debug, Default)]
pub struct MemoryMerkleTrees {
    trees: Mutex<HashMap<MerkleTreeId, AppendOnlyTreeSnapshot>>,
}

impl MemoryMerkleTrees {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MerkleTreeOperations for MemoryMerkleTrees {
    async fn get_tree_info(&self, tree: MerkleTreeId) -> anyhow::Result<AppendOnlyTreeSnapshot> {
        Ok(self
            .trees
            .lock()
            .await
            .get(&tree)
            .copied()
            .unwrap_or_default())
    }

    async fn append_leaves(&self, tree: MerkleTreeId, leaves: &[Fr]) -> anyhow::Result<()> {
        let mut trees = self.trees.lock().await;
        let snapshot = trees.entry(tree).or_default();
        *snapshot = snapshot.append(leaves);
        Ok(())
    }

    async fn update_archive(&self, header: &Header) -> anyhow::Result<()> {
        self.append_leaves(MerkleTreeId::Archive, &[header.hash()])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trees_are_independent() {
        let db = MemoryMerkleTrees::new();
        db.append_leaves(MerkleTreeId::NoteHashTree, &[Fr::from(1), Fr::from(2)])
            .await
            .unwrap();

        let notes = db.get_tree_info(MerkleTreeId::NoteHashTree).await.unwrap();
        assert_eq!(notes.next_available_leaf_index, 2);
        for tree in MerkleTreeId::ALL
            .into_iter()
            .filter(|t| *t != MerkleTreeId::NoteHashTree)
        {
            assert_eq!(
                db.get_tree_info(tree).await.unwrap(),
                AppendOnlyTreeSnapshot::default()
            );
        }
    }

    #[tokio::test]
    async fn update_archive_appends_header_hash() {
        let db = Arc::new(MemoryMerkleTrees::new());
        let header = Header::default();
        db.update_archive(&header).await.unwrap();

        let archive = db.get_tree_info(MerkleTreeId::Archive).await.unwrap();
        assert_eq!(
            archive,
            AppendOnlyTreeSnapshot::default().append(&[header.hash()])
        );
    }
}
