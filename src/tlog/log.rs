//! Tile-Structured Merkle Log
//!
//! Append-only Merkle tree over 32-byte leaf values, persisted as tiles of
//! 256 hashes in the object store:
//!
//! - `tile/entries/<path>` holds the raw leaf values as submitted
//! - `tile/<L>/<path>` holds tree hashes; level 0 carries the RFC 6962
//!   leaf hashes, and each hash at level L+1 is the Merkle tree hash of a
//!   completed level-L tile (256 times as many leaves per hash)
//!
//! A full tile (8192 bytes) is immutable once written. The growing edge of
//! the tree is written as partial tiles under `<path>.p/<W>` with strictly
//! increasing width.
//!
//! Appends are serialised through a mutex; tiles are written before the
//! authoritative size advances in the metadata store, and a startup scan
//! rolls a single pending append forward after a crash.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;

use super::checkpoint::CheckpointSigner;
use super::hash::{leaf_hash, node_hash, prev_pow2, Hash, HASH_SIZE};
use super::path::{
    entry_tile_key, entry_tile_partial_key, hash_tile_key, hash_tile_partial_key,
};
use super::{proof, TlogError};
use crate::storage::{AppendCommit, MetadataStore, ObjectStore, StorageError};
use crate::types::StatementRecord;

/// Hashes per tile
pub const TILE_WIDTH: usize = 256;

/// Object-store key of the cached tree state
const TREE_STATE_KEY: &str = ".tree-state";

/// The growing edge of the tree: current size plus the contents of every
/// partial tile, so appends do not re-read the store.
#[derive(Debug, Clone, Default)]
struct LogState {
    size: u64,
    entry_buf: Vec<Hash>,
    level_bufs: Vec<Vec<Hash>>,
}

/// Single-writer tile log
pub struct TileLog {
    store: Arc<dyn ObjectStore>,
    meta: Arc<dyn MetadataStore>,
    signer: CheckpointSigner,
    state: Mutex<LogState>,
}

impl TileLog {
    /// Open the log, reconciling the metadata size against tile contents.
    ///
    /// If the tiles hold exactly one more entry than the metadata store
    /// (a crash between tile writes and the size commit), the pending
    /// append is completed. Any wider divergence refuses to start.
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        meta: Arc<dyn MetadataStore>,
        signer: CheckpointSigner,
    ) -> Result<Self, TlogError> {
        let recorded = meta.current_tree_size().await?;
        let observed = scan_entry_count(store.as_ref()).await?;

        let size = if observed == recorded {
            recorded
        } else if observed == recorded + 1 {
            tracing::warn!(recorded, observed, "completing append interrupted by crash");
            repair_hash_tiles(store.as_ref(), observed).await?;
            let mut reader = TileReader::new(store.as_ref(), observed);
            let root = reader.root().await?;
            let checkpoint = signer.create(observed, root)?;
            meta.commit_append(AppendCommit {
                new_size: observed,
                root_hash: hex::encode(root),
                checkpoint: checkpoint.encode(),
                statement: None,
            })
            .await?;
            write_tree_state(store.as_ref(), observed, &root).await;
            observed
        } else {
            return Err(TlogError::Corrupt(format!(
                "metadata size {} does not match {} entries observed in tiles",
                recorded, observed
            )));
        };

        let state = load_state(store.as_ref(), size).await?;
        Ok(Self {
            store,
            meta,
            signer,
            state: Mutex::new(state),
        })
    }

    /// Current tree size
    pub async fn size(&self) -> u64 {
        self.state.lock().await.size
    }

    /// Append a leaf value, committing the given statement metadata in the
    /// same transaction that advances the tree size.
    ///
    /// Returns the entry id (the leaf's 0-indexed position).
    pub async fn append_entry(
        &self,
        leaf: Hash,
        statement: Option<StatementRecord>,
    ) -> Result<u64, TlogError> {
        let mut state = self.state.lock().await;
        let mut work = state.clone();
        let mut written: Vec<String> = Vec::new();

        let entry_id = work.size;
        let new_size = entry_id + 1;

        // Entry tile
        work.entry_buf.push(leaf);
        let entry_index = entry_id / TILE_WIDTH as u64;
        let entry_key = if work.entry_buf.len() == TILE_WIDTH {
            entry_tile_key(entry_index)
        } else {
            entry_tile_partial_key(entry_index, work.entry_buf.len())
        };
        self.store.put(&entry_key, &tile_bytes(&work.entry_buf)).await?;
        written.push(entry_key);
        if work.entry_buf.len() == TILE_WIDTH {
            work.entry_buf.clear();
        }

        // Hash tiles, propagating completed tiles upward
        let mut carry = leaf_hash(&leaf);
        let mut level = 0usize;
        loop {
            if work.level_bufs.len() == level {
                work.level_bufs.push(Vec::new());
            }
            work.level_bufs[level].push(carry);

            let count = new_size >> (8 * level as u32);
            let tile_index = (count - 1) / TILE_WIDTH as u64;
            debug_assert_eq!(
                work.level_bufs[level].len() as u64,
                count - tile_index * TILE_WIDTH as u64
            );

            if work.level_bufs[level].len() == TILE_WIDTH {
                let key = hash_tile_key(level as u8, tile_index);
                self.store
                    .put(&key, &tile_bytes(&work.level_bufs[level]))
                    .await?;
                written.push(key);
                carry = fold(&work.level_bufs[level]);
                work.level_bufs[level].clear();
                level += 1;
            } else {
                let key =
                    hash_tile_partial_key(level as u8, tile_index, work.level_bufs[level].len());
                self.store
                    .put(&key, &tile_bytes(&work.level_bufs[level]))
                    .await?;
                written.push(key);
                break;
            }
        }

        // Root and checkpoint over the new tree
        let mut reader = TileReader::new(self.store.as_ref(), new_size);
        let root = reader.root().await?;
        let checkpoint = self.signer.create(new_size, root)?;

        let statement = statement.map(|mut record| {
            record.entry_id = entry_id;
            record.tree_size = new_size;
            record.entry_tile_key = entry_tile_key(entry_index);
            record.entry_tile_offset = (entry_id % TILE_WIDTH as u64) as u32;
            record
        });

        // The size advance is the commit point. If it fails, remove the
        // tile keys written above so the log stays observationally
        // unchanged.
        if let Err(e) = self
            .meta
            .commit_append(AppendCommit {
                new_size,
                root_hash: hex::encode(root),
                checkpoint: checkpoint.encode(),
                statement,
            })
            .await
        {
            for key in &written {
                let _ = self.store.delete(key).await;
            }
            return Err(e.into());
        }

        write_tree_state(self.store.as_ref(), new_size, &root).await;

        work.size = new_size;
        *state = work;
        Ok(entry_id)
    }

    /// Append a bare leaf value with no statement metadata
    pub async fn append(&self, leaf: Hash) -> Result<u64, TlogError> {
        self.append_entry(leaf, None).await
    }

    /// Root hash over all current leaves. Undefined for the empty tree.
    pub async fn root(&self) -> Result<Hash, TlogError> {
        let size = self.size().await;
        if size == 0 {
            return Err(TlogError::EmptyTree);
        }
        TileReader::new(self.store.as_ref(), size).root().await
    }

    /// Historic root at tree size `at`, for `0 < at <= size()`
    pub async fn root_at(&self, at: u64) -> Result<Hash, TlogError> {
        let size = self.size().await;
        if at == 0 || at > size {
            return Err(TlogError::InvalidRange { from: at, to: size });
        }
        TileReader::new(self.store.as_ref(), size)
            .range_hash(0, at)
            .await
    }

    /// Leaf value at `entry_id`, read from the entry tiles
    pub async fn leaf(&self, entry_id: u64) -> Result<Hash, TlogError> {
        let size = self.size().await;
        TileReader::new(self.store.as_ref(), size)
            .entry(entry_id)
            .await
    }

    /// Inclusion proof for the leaf at `index` in the tree of size `tree_size`
    pub async fn inclusion_proof(
        &self,
        index: u64,
        tree_size: u64,
    ) -> Result<Vec<Hash>, TlogError> {
        let size = self.size().await;
        if tree_size > size {
            return Err(TlogError::InvalidRange {
                from: tree_size,
                to: size,
            });
        }
        let mut reader = TileReader::new(self.store.as_ref(), size);
        proof::inclusion_proof(&mut reader, index, tree_size).await
    }

    /// Consistency proof from tree size `old_size` to `new_size`
    pub async fn consistency_proof(
        &self,
        old_size: u64,
        new_size: u64,
    ) -> Result<Vec<Hash>, TlogError> {
        let size = self.size().await;
        if new_size > size {
            return Err(TlogError::InvalidRange {
                from: new_size,
                to: size,
            });
        }
        let mut reader = TileReader::new(self.store.as_ref(), size);
        proof::consistency_proof(&mut reader, old_size, new_size).await
    }
}

/// Read-side view of the tiles for a tree of a given size.
///
/// Caches each tile for the duration of one proof or root computation, so
/// a proof costs O(log N) tile reads.
pub struct TileReader<'a> {
    store: &'a dyn ObjectStore,
    tree_size: u64,
    hash_tiles: HashMap<(u8, u64), Arc<Vec<Hash>>>,
    entry_tiles: HashMap<u64, Arc<Vec<Hash>>>,
}

impl<'a> TileReader<'a> {
    pub fn new(store: &'a dyn ObjectStore, tree_size: u64) -> Self {
        Self {
            store,
            tree_size,
            hash_tiles: HashMap::new(),
            entry_tiles: HashMap::new(),
        }
    }

    /// Root over the whole tree
    pub async fn root(&mut self) -> Result<Hash, TlogError> {
        if self.tree_size == 0 {
            return Err(TlogError::EmptyTree);
        }
        self.range_hash(0, self.tree_size).await
    }

    /// Leaf value at `index`
    pub async fn entry(&mut self, index: u64) -> Result<Hash, TlogError> {
        if index >= self.tree_size {
            return Err(TlogError::InvalidIndex {
                index,
                tree_size: self.tree_size,
            });
        }
        let tile_index = index / TILE_WIDTH as u64;
        let offset = (index % TILE_WIDTH as u64) as usize;

        if let Some(tile) = self.entry_tiles.get(&tile_index) {
            return Ok(tile[offset]);
        }
        let avail = tile_width(self.tree_size, tile_index);
        let key = if avail == TILE_WIDTH {
            entry_tile_key(tile_index)
        } else {
            entry_tile_partial_key(tile_index, avail)
        };
        let tile = Arc::new(self.read_tile(&key, avail).await?);
        let value = tile[offset];
        self.entry_tiles.insert(tile_index, tile);
        Ok(value)
    }

    /// RFC 6962 Merkle tree hash of the leaf range `[lo, hi)`.
    ///
    /// The range must arise from the standard recursive split of a tree of
    /// at most `tree_size` leaves; every perfect subtree it decomposes
    /// into is materialised from stored tiles.
    pub fn range_hash(&mut self, lo: u64, hi: u64) -> BoxFuture<'_, Result<Hash, TlogError>> {
        Box::pin(async move {
            if lo >= hi || hi > self.tree_size {
                return Err(TlogError::InvalidRange { from: lo, to: hi });
            }
            let size = hi - lo;
            if size.is_power_of_two() && lo % size == 0 {
                return self.node(size.trailing_zeros(), lo / size).await;
            }
            let k = prev_pow2(size);
            let left = self.range_hash(lo, lo + k).await?;
            let right = self.range_hash(lo + k, hi).await?;
            Ok(node_hash(&left, &right))
        })
    }

    /// Hash of the perfect subtree at tree level `level` covering leaves
    /// `[index * 2^level, (index + 1) * 2^level)`.
    ///
    /// Levels that are multiples of 8 are stored directly; in-between
    /// levels fold a slice of the tile below.
    async fn node(&mut self, level: u32, index: u64) -> Result<Hash, TlogError> {
        let tile_level = (level / 8) as u8;
        let span = 1usize << (level % 8);
        let start = index
            .checked_mul(span as u64)
            .ok_or(TlogError::InvalidRange { from: index, to: 0 })?;
        let tile_index = start / TILE_WIDTH as u64;
        let offset = (start % TILE_WIDTH as u64) as usize;

        let tile = self.hash_tile(tile_level, tile_index).await?;
        if tile.len() < offset + span {
            return Err(TlogError::Corrupt(format!(
                "hash tile {}/{} holds {} hashes, need {}",
                tile_level,
                tile_index,
                tile.len(),
                offset + span
            )));
        }
        Ok(fold(&tile[offset..offset + span]))
    }

    async fn hash_tile(
        &mut self,
        tile_level: u8,
        tile_index: u64,
    ) -> Result<Arc<Vec<Hash>>, TlogError> {
        if let Some(tile) = self.hash_tiles.get(&(tile_level, tile_index)) {
            return Ok(Arc::clone(tile));
        }
        let total = hashes_at_level(self.tree_size, tile_level);
        let avail = tile_width(total, tile_index);
        if avail == 0 {
            return Err(TlogError::Corrupt(format!(
                "hash tile {}/{} does not exist at tree size {}",
                tile_level, tile_index, self.tree_size
            )));
        }
        let key = if avail == TILE_WIDTH {
            hash_tile_key(tile_level, tile_index)
        } else {
            hash_tile_partial_key(tile_level, tile_index, avail)
        };
        let tile = Arc::new(self.read_tile(&key, avail).await?);
        self.hash_tiles
            .insert((tile_level, tile_index), Arc::clone(&tile));
        Ok(tile)
    }

    async fn read_tile(&self, key: &str, expect: usize) -> Result<Vec<Hash>, TlogError> {
        let bytes = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| TlogError::Storage(StorageError::NotFound(key.to_string())))?;
        let hashes = parse_tile(&bytes)?;
        if hashes.len() != expect {
            return Err(TlogError::Corrupt(format!(
                "tile {} holds {} hashes, expected {}",
                key,
                hashes.len(),
                expect
            )));
        }
        Ok(hashes)
    }
}

/// Number of complete hashes at a tile level for a tree of `n` leaves
fn hashes_at_level(n: u64, tile_level: u8) -> u64 {
    let shift = 8 * tile_level as u32;
    if shift >= 64 {
        0
    } else {
        n >> shift
    }
}

/// Hashes available in one tile, given the total at that level
fn tile_width(total: u64, tile_index: u64) -> usize {
    total
        .saturating_sub(tile_index * TILE_WIDTH as u64)
        .min(TILE_WIDTH as u64) as usize
}

/// Merkle tree hash of a power-of-two slice of sibling hashes
fn fold(hashes: &[Hash]) -> Hash {
    debug_assert!(hashes.len().is_power_of_two());
    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| node_hash(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

fn tile_bytes(hashes: &[Hash]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(hashes.len() * HASH_SIZE);
    for hash in hashes {
        bytes.extend_from_slice(hash);
    }
    bytes
}

fn parse_tile(bytes: &[u8]) -> Result<Vec<Hash>, TlogError> {
    if bytes.len() % HASH_SIZE != 0 {
        return Err(TlogError::Corrupt(format!(
            "tile length {} is not a multiple of {}",
            bytes.len(),
            HASH_SIZE
        )));
    }
    Ok(bytes
        .chunks_exact(HASH_SIZE)
        .map(|chunk| {
            let mut hash = [0u8; HASH_SIZE];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

/// Best-effort cache of the current size and root; the metadata store
/// remains authoritative.
async fn write_tree_state(store: &dyn ObjectStore, size: u64, root: &Hash) {
    let state = serde_json::json!({
        "tree_size": size,
        "root_hash": hex::encode(root),
    });
    if let Err(e) = store.put(TREE_STATE_KEY, state.to_string().as_bytes()).await {
        tracing::warn!(error = %e, "failed to write tree-state cache");
    }
}

/// Rebuild the hash tiles touched by the newest entry, bottom-up, from
/// the tiles below them.
///
/// The entry tiles are written first during an append, so after a crash
/// they are authoritative; any hash tile the interrupted append did not
/// reach is recomputed here. Tiles that were fully written come out
/// byte-identical.
async fn repair_hash_tiles(store: &dyn ObjectStore, n: u64) -> Result<(), TlogError> {
    let mut level = 0u8;
    loop {
        let count = hashes_at_level(n, level);
        if count == 0 {
            break;
        }
        let tile_index = (count - 1) / TILE_WIDTH as u64;
        let width = (count - tile_index * TILE_WIDTH as u64) as usize;

        let mut hashes = Vec::with_capacity(width);
        if level == 0 {
            let key = if width == TILE_WIDTH {
                entry_tile_key(tile_index)
            } else {
                entry_tile_partial_key(tile_index, width)
            };
            let bytes = store
                .get(&key)
                .await?
                .ok_or_else(|| TlogError::Corrupt(format!("missing entry tile {}", key)))?;
            let entries = parse_tile(&bytes)?;
            if entries.len() != width {
                return Err(TlogError::Corrupt(format!("short entry tile {}", key)));
            }
            hashes.extend(entries.iter().map(|value| leaf_hash(value)));
        } else {
            for slot in 0..width as u64 {
                let below = hash_tile_key(level - 1, tile_index * TILE_WIDTH as u64 + slot);
                let bytes = store
                    .get(&below)
                    .await?
                    .ok_or_else(|| TlogError::Corrupt(format!("missing hash tile {}", below)))?;
                let tile = parse_tile(&bytes)?;
                if tile.len() != TILE_WIDTH {
                    return Err(TlogError::Corrupt(format!("short hash tile {}", below)));
                }
                hashes.push(fold(&tile));
            }
        }

        let key = if width == TILE_WIDTH {
            hash_tile_key(level, tile_index)
        } else {
            hash_tile_partial_key(level, tile_index, width)
        };
        store.put(&key, &tile_bytes(&hashes)).await?;
        level += 1;
    }
    Ok(())
}

/// Count the entries present in the tiles: galloping search for the last
/// full entry tile, then a binary search over partial widths.
async fn scan_entry_count(store: &dyn ObjectStore) -> Result<u64, TlogError> {
    let full_tiles = if !store.exists(&entry_tile_key(0)).await? {
        0
    } else {
        let mut lo = 0u64;
        let mut hi = 1u64;
        while store.exists(&entry_tile_key(hi)).await? {
            lo = hi;
            hi *= 2;
        }
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if store.exists(&entry_tile_key(mid)).await? {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        lo + 1
    };

    // Widths are written in increasing order, so presence is monotone.
    let mut lo = 0usize;
    let mut hi = TILE_WIDTH;
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if store
            .exists(&entry_tile_partial_key(full_tiles, mid))
            .await?
        {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    Ok(full_tiles * TILE_WIDTH as u64 + lo as u64)
}

/// Rebuild the in-memory growing edge from the stored partial tiles.
async fn load_state(store: &dyn ObjectStore, size: u64) -> Result<LogState, TlogError> {
    let mut state = LogState {
        size,
        ..Default::default()
    };

    let entry_width = (size % TILE_WIDTH as u64) as usize;
    if entry_width != 0 {
        let key = entry_tile_partial_key(size / TILE_WIDTH as u64, entry_width);
        let bytes = store
            .get(&key)
            .await?
            .ok_or_else(|| TlogError::Corrupt(format!("missing partial tile {}", key)))?;
        state.entry_buf = parse_tile(&bytes)?;
        if state.entry_buf.len() != entry_width {
            return Err(TlogError::Corrupt(format!("short partial tile {}", key)));
        }
    }

    let mut level = 0u8;
    loop {
        let count = hashes_at_level(size, level);
        if count == 0 {
            break;
        }
        let width = (count % TILE_WIDTH as u64) as usize;
        if width == 0 {
            state.level_bufs.push(Vec::new());
        } else {
            let key = hash_tile_partial_key(level, count / TILE_WIDTH as u64, width);
            let bytes = store
                .get(&key)
                .await?
                .ok_or_else(|| TlogError::Corrupt(format!("missing partial tile {}", key)))?;
            let buf = parse_tile(&bytes)?;
            if buf.len() != width {
                return Err(TlogError::Corrupt(format!("short partial tile {}", key)));
            }
            state.level_bufs.push(buf);
        }
        level += 1;
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryObjectStore, SqliteMetadataStore};
    use crate::tlog::proof::{verify_consistency, verify_inclusion};

    fn test_signer() -> CheckpointSigner {
        let key = p256::ecdsa::SigningKey::from_slice(&[7u8; 32]).unwrap();
        CheckpointSigner::new(key, "https://transparency.example.com").unwrap()
    }

    async fn open_log() -> (Arc<MemoryObjectStore>, Arc<SqliteMetadataStore>, TileLog) {
        let store = Arc::new(MemoryObjectStore::new());
        let meta = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let log = TileLog::open(store.clone(), meta.clone(), test_signer())
            .await
            .unwrap();
        (store, meta, log)
    }

    /// Leaf value filled with one byte
    fn leaf(byte: u8) -> Hash {
        [byte; 32]
    }

    #[tokio::test]
    async fn test_empty_log() {
        let (_, _, log) = open_log().await;
        assert_eq!(log.size().await, 0);
        assert!(matches!(log.root().await, Err(TlogError::EmptyTree)));
    }

    #[tokio::test]
    async fn test_single_entry_root_is_leaf_hash() {
        let (_, _, log) = open_log().await;
        let id = log.append(leaf(1)).await.unwrap();
        assert_eq!(id, 0);
        assert_eq!(log.size().await, 1);
        assert_eq!(log.root().await.unwrap(), leaf_hash(&leaf(1)));

        let proof = log.inclusion_proof(0, 1).await.unwrap();
        assert!(proof.is_empty());
        assert!(verify_inclusion(0, 1, &leaf(1), &proof, &log.root().await.unwrap()).unwrap());
    }

    #[tokio::test]
    async fn test_four_leaf_worked_example() {
        let (_, _, log) = open_log().await;
        for i in 0..4u8 {
            log.append(leaf(i)).await.unwrap();
        }

        let h: Vec<Hash> = (0..4u8).map(|i| leaf_hash(&leaf(i))).collect();
        let n01 = node_hash(&h[0], &h[1]);
        let n23 = node_hash(&h[2], &h[3]);
        let root = node_hash(&n01, &n23);
        assert_eq!(log.root().await.unwrap(), root);

        let proof = log.inclusion_proof(2, 4).await.unwrap();
        assert_eq!(proof, vec![h[3], n01]);
        assert!(verify_inclusion(2, 4, &leaf(2), &proof, &root).unwrap());
    }

    #[tokio::test]
    async fn test_leaf_readback() {
        let (_, _, log) = open_log().await;
        for i in 0..10u8 {
            log.append(leaf(i)).await.unwrap();
        }
        assert_eq!(log.leaf(0).await.unwrap(), leaf(0));
        assert_eq!(log.leaf(9).await.unwrap(), leaf(9));
        assert!(matches!(
            log.leaf(10).await,
            Err(TlogError::InvalidIndex { .. })
        ));
    }

    #[tokio::test]
    async fn test_inclusion_soundness_and_tamper_detection() {
        let (_, _, log) = open_log().await;
        for i in 0..21u8 {
            log.append(leaf(i)).await.unwrap();
        }
        let n = log.size().await;
        let root = log.root().await.unwrap();

        for i in 0..n {
            let proof = log.inclusion_proof(i, n).await.unwrap();
            assert!(verify_inclusion(i, n, &leaf(i as u8), &proof, &root).unwrap());

            // Wrong leaf fails
            assert!(!verify_inclusion(i, n, &leaf(99), &proof, &root).unwrap());

            // Tampered sibling fails
            if !proof.is_empty() {
                let mut bad = proof.clone();
                bad[0][0] ^= 0x01;
                assert!(!verify_inclusion(i, n, &leaf(i as u8), &bad, &root).unwrap());
            }
        }
    }

    #[tokio::test]
    async fn test_consistency_soundness() {
        let (_, _, log) = open_log().await;
        let mut roots = Vec::new();
        for i in 0..12u8 {
            log.append(leaf(i)).await.unwrap();
            roots.push(log.root().await.unwrap());
        }

        for m in 1..=12u64 {
            // root_at matches the root observed at that size
            assert_eq!(log.root_at(m).await.unwrap(), roots[m as usize - 1]);
            for n in m..=12u64 {
                let proof = log.consistency_proof(m, n).await.unwrap();
                assert!(verify_consistency(
                    m,
                    n,
                    &proof,
                    &roots[m as usize - 1],
                    &roots[n as usize - 1]
                )
                .unwrap());
            }
        }
    }

    #[tokio::test]
    async fn test_consistency_three_to_four_exact_elements() {
        let (_, _, log) = open_log().await;
        for i in 0..4u8 {
            log.append(leaf(i)).await.unwrap();
        }
        let h: Vec<Hash> = (0..4u8).map(|i| leaf_hash(&leaf(i))).collect();
        let n01 = node_hash(&h[0], &h[1]);

        let proof = log.consistency_proof(3, 4).await.unwrap();
        assert_eq!(proof, vec![h[2], h[3], n01]);

        let old_root = node_hash(&n01, &h[2]);
        let new_root = node_hash(&n01, &node_hash(&h[2], &h[3]));
        assert!(verify_consistency(3, 4, &proof, &old_root, &new_root).unwrap());
    }

    #[tokio::test]
    async fn test_tile_boundaries() {
        let (store, _, log) = open_log().await;

        for i in 0..255u64 {
            log.append(leaf((i % 251) as u8)).await.unwrap();
        }
        assert!(store
            .exists("tile/entries/000.p/255")
            .await
            .unwrap());
        assert!(!store.exists("tile/entries/000").await.unwrap());

        // 256th entry completes the tile
        log.append(leaf(255)).await.unwrap();
        let full = store.get("tile/entries/000").await.unwrap().unwrap();
        assert_eq!(full.len(), TILE_WIDTH * HASH_SIZE);
        let level0 = store.get("tile/0/000").await.unwrap().unwrap();
        assert_eq!(level0.len(), TILE_WIDTH * HASH_SIZE);
        // One hash propagated to level 1
        assert!(store.exists("tile/1/000.p/1").await.unwrap());
        assert!(!store.exists("tile/entries/001.p/1").await.unwrap());

        // 257th entry opens the next tile at width 1
        log.append(leaf(1)).await.unwrap();
        assert!(store.exists("tile/entries/001.p/1").await.unwrap());

        for i in 257..512u64 {
            log.append(leaf((i % 251) as u8)).await.unwrap();
        }
        assert_eq!(log.size().await, 512);
        assert!(store.exists("tile/entries/001").await.unwrap());
        assert!(store.exists("tile/1/000.p/2").await.unwrap());

        // Full tiles stay byte-identical after later appends
        assert_eq!(
            store.get("tile/entries/000").await.unwrap().unwrap(),
            full
        );
        // Proofs still verify across the boundary
        let root = log.root().await.unwrap();
        let proof = log.inclusion_proof(300, 512).await.unwrap();
        assert!(verify_inclusion(300, 512, &leaf((300 % 251) as u8), &proof, &root).unwrap());
    }

    #[tokio::test]
    async fn test_reopen_restores_state() {
        let store = Arc::new(MemoryObjectStore::new());
        let meta = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let log = TileLog::open(store.clone(), meta.clone(), test_signer())
            .await
            .unwrap();
        for i in 0..300u64 {
            log.append(leaf((i % 251) as u8)).await.unwrap();
        }
        let root = log.root().await.unwrap();
        drop(log);

        let reopened = TileLog::open(store, meta, test_signer()).await.unwrap();
        assert_eq!(reopened.size().await, 300);
        assert_eq!(reopened.root().await.unwrap(), root);

        // The reopened log appends correctly
        reopened.append(leaf(77)).await.unwrap();
        assert_eq!(reopened.size().await, 301);
    }

    #[tokio::test]
    async fn test_crash_recovery_rolls_pending_append_forward() {
        // Log A gets 6 entries; log B gets the first 5 with its own
        // metadata. Copying A's tiles over B's store simulates a crash
        // after tile writes but before the size commit of entry 6.
        let store_a = Arc::new(MemoryObjectStore::new());
        let meta_a = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let log_a = TileLog::open(store_a.clone(), meta_a, test_signer())
            .await
            .unwrap();

        let store_b = Arc::new(MemoryObjectStore::new());
        let meta_b = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let log_b = TileLog::open(store_b.clone(), meta_b.clone(), test_signer())
            .await
            .unwrap();

        for i in 0..6u8 {
            log_a.append(leaf(i)).await.unwrap();
            if i < 5 {
                log_b.append(leaf(i)).await.unwrap();
            }
        }
        let root_a = log_a.root().await.unwrap();
        drop(log_b);

        for key in store_a.list("").await.unwrap() {
            let bytes = store_a.get(&key).await.unwrap().unwrap();
            store_b.put(&key, &bytes).await.unwrap();
        }
        assert_eq!(meta_b.current_tree_size().await.unwrap(), 5);

        let recovered = TileLog::open(store_b, meta_b.clone(), test_signer())
            .await
            .unwrap();
        assert_eq!(recovered.size().await, 6);
        assert_eq!(recovered.root().await.unwrap(), root_a);
        assert_eq!(meta_b.current_tree_size().await.unwrap(), 6);
        // Checkpoint history covers the rolled-forward size
        assert!(meta_b.tree_state_at(6).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_crash_recovery_rebuilds_missing_hash_tiles() {
        // Crash after the entry-tile write but before any hash-tile
        // write: only the entry tiles know about the 6th leaf.
        let store = Arc::new(MemoryObjectStore::new());
        let meta = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let log = TileLog::open(store.clone(), meta.clone(), test_signer())
            .await
            .unwrap();
        for i in 0..5u8 {
            log.append(leaf(i)).await.unwrap();
        }
        drop(log);

        let entries: Vec<Hash> = (0..6u8).map(leaf).collect();
        store
            .put("tile/entries/000.p/6", &tile_bytes(&entries))
            .await
            .unwrap();

        let recovered = TileLog::open(store, meta, test_signer()).await.unwrap();
        assert_eq!(recovered.size().await, 6);

        // Root matches a log that appended the same six leaves normally
        let reference_store = Arc::new(MemoryObjectStore::new());
        let reference_meta = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let reference = TileLog::open(reference_store, reference_meta, test_signer())
            .await
            .unwrap();
        for i in 0..6u8 {
            reference.append(leaf(i)).await.unwrap();
        }
        assert_eq!(
            recovered.root().await.unwrap(),
            reference.root().await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_size_regression_refused() {
        let store = Arc::new(MemoryObjectStore::new());
        let meta = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let log = TileLog::open(store.clone(), meta.clone(), test_signer())
            .await
            .unwrap();
        for i in 0..5u8 {
            log.append(leaf(i)).await.unwrap();
        }
        drop(log);

        // Wipe the tiles but keep the metadata claiming size 5
        for key in store.list("").await.unwrap() {
            store.delete(&key).await.unwrap();
        }
        let result = TileLog::open(store, meta, test_signer()).await;
        assert!(matches!(result, Err(TlogError::Corrupt(_))));
    }
}
