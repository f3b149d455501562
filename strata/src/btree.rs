//! A disk-resident B-tree over fixed-width encoded keys.
//!
//! Node layout after the 28-byte page header: a 4-byte btree header
//! (leaf flag u8, key count u16, reserved u8). Leaves hold `k` pairs of
//! (key bytes, RID); internal nodes hold child0 followed by `k` pairs of
//! (key bytes, child). Keys are normalized to a fixed width and encoded so
//! plain byte comparison matches the value ordering.

use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::buffer_pool::BufferPoolManager;
use crate::datum::Value;
use crate::error::StorageError;
use crate::page::{Page, PAGE_HEADER_SIZE, PAGE_TYPE_BTREE};
use crate::{PageId, Result, PAGE_SIZE};

const BTREE_HEADER_SIZE: usize = 4;
const RID_SIZE: usize = 12;
const PAGE_ID_SIZE: usize = 4;

/// Default fixed key width used by the engine's indexes.
pub const BTREE_KEY_SIZE: usize = 64;

/// A stable tuple address: page, slot and owning table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u16,
    pub table_id: u32,
}

impl Rid {
    pub fn serialize(&self) -> [u8; RID_SIZE] {
        let mut buf = [0u8; RID_SIZE];
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.slot_num.to_le_bytes());
        // Two bytes of padding keep the table id aligned.
        buf[8..12].copy_from_slice(&self.table_id.to_le_bytes());
        buf
    }

    pub fn deserialize(buf: &[u8]) -> Rid {
        Rid {
            page_id: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            slot_num: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            table_id: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        }
    }
}

/// Encodes a value into `key_size` bytes whose byte order matches the value
/// order: INT flips the sign bit and goes big-endian, TEXT is zero-padded
/// raw bytes, BOOL is a single byte.
pub fn encode_key(value: &Value, key_size: usize) -> Vec<u8> {
    let mut key = vec![0u8; key_size];
    match value {
        Value::Int(v) => {
            let flipped = (*v as u64) ^ (1 << 63);
            key[0..8].copy_from_slice(&flipped.to_be_bytes());
        }
        Value::Text(v) => {
            let n = v.len().min(key_size);
            key[..n].copy_from_slice(&v.as_bytes()[..n]);
        }
        Value::Bool(v) => {
            key[0] = *v as u8;
        }
        Value::Null => {}
    }
    key
}

struct Node {
    is_leaf: bool,
    keys: Vec<Vec<u8>>,
    /// Leaf payloads, one per key.
    values: Vec<Rid>,
    /// Internal children, one more than keys.
    children: Vec<PageId>,
}

impl Node {
    fn leaf() -> Node {
        Node {
            is_leaf: true,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }
}

pub struct BTree {
    bpm: Arc<BufferPoolManager>,
    root: PageId,
    key_size: usize,
    order: usize,
}

impl BTree {
    /// Allocates an empty tree: the root starts out as an empty leaf.
    pub fn create(bpm: Arc<BufferPoolManager>, key_size: usize) -> Result<Self> {
        let guard = bpm.new_page(PAGE_TYPE_BTREE)?;
        let root = guard.page_id();
        write_node(&mut guard.write(), &Node::leaf(), key_size)?;
        drop(guard);

        Ok(BTree {
            bpm,
            root,
            key_size,
            order: order_for(key_size),
        })
    }

    pub fn load(bpm: Arc<BufferPoolManager>, root: PageId, key_size: usize) -> Self {
        BTree {
            bpm,
            root,
            key_size,
            order: order_for(key_size),
        }
    }

    pub fn root_page_id(&self) -> PageId {
        self.root
    }

    /// Upserts: an existing key gets its RID overwritten, a fresh key is
    /// placed in sorted position and overflowing nodes split upward.
    pub fn insert(&mut self, key: &[u8], rid: Rid) -> Result<()> {
        let key = self.normalize(key);
        let (leaf_id, path) = self.find_leaf(&key)?;
        let mut leaf = self.read_node(leaf_id)?;

        match leaf.keys.binary_search(&key) {
            Ok(pos) => {
                leaf.values[pos] = rid;
                self.write_back(leaf_id, &leaf)?;
                return Ok(());
            }
            Err(pos) => {
                leaf.keys.insert(pos, key);
                leaf.values.insert(pos, rid);
            }
        }

        if leaf.keys.len() > self.order - 1 {
            self.split_leaf(leaf_id, leaf, path)
        } else {
            self.write_back(leaf_id, &leaf)
        }
    }

    /// Exact-match lookup.
    pub fn search(&self, key: &[u8]) -> Result<Option<Rid>> {
        let key = self.normalize(key);
        let (leaf_id, _) = self.find_leaf(&key)?;
        let leaf = self.read_node(leaf_id)?;
        Ok(leaf
            .keys
            .binary_search(&key)
            .ok()
            .map(|pos| leaf.values[pos]))
    }

    /// Removes a key from its leaf; underflow is left alone. Returns
    /// whether a key was removed.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let key = self.normalize(key);
        let (leaf_id, _) = self.find_leaf(&key)?;
        let mut leaf = self.read_node(leaf_id)?;

        match leaf.keys.binary_search(&key) {
            Ok(pos) => {
                leaf.keys.remove(pos);
                leaf.values.remove(pos);
                self.write_back(leaf_id, &leaf)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Every RID in the tree, in key order.
    pub fn scan_all(&self) -> Result<Vec<Rid>> {
        let mut results = Vec::new();
        self.scan_node(self.root, &mut results)?;
        Ok(results)
    }

    fn scan_node(&self, page_id: PageId, results: &mut Vec<Rid>) -> Result<()> {
        let node = self.read_node(page_id)?;
        if node.is_leaf {
            results.extend(node.values.iter().copied());
        } else {
            for child in &node.children {
                self.scan_node(*child, results)?;
            }
        }
        Ok(())
    }

    /// Descends from the root, choosing at each internal node the child
    /// index equal to the number of keys <= the probe. Returns the leaf and
    /// the internal path above it.
    fn find_leaf(&self, key: &[u8]) -> Result<(PageId, Vec<PageId>)> {
        let mut path = Vec::new();
        let mut current = self.root;

        loop {
            let node = self.read_node(current)?;
            if node.is_leaf {
                return Ok((current, path));
            }

            let mut child_idx = 0;
            for k in &node.keys {
                if key >= k.as_slice() {
                    child_idx += 1;
                } else {
                    break;
                }
            }
            path.push(current);
            current = node.children[child_idx];
        }
    }

    fn split_leaf(&mut self, leaf_id: PageId, mut leaf: Node, path: Vec<PageId>) -> Result<()> {
        let right_guard = self.bpm.new_page(PAGE_TYPE_BTREE)?;
        let right_id = right_guard.page_id();

        let mid = leaf.keys.len() / 2;
        let right = Node {
            is_leaf: true,
            keys: leaf.keys.split_off(mid),
            values: leaf.values.split_off(mid),
            children: Vec::new(),
        };
        let separator = right.keys[0].clone();

        write_node(&mut right_guard.write(), &right, self.key_size)?;
        drop(right_guard);
        self.write_back(leaf_id, &leaf)?;

        self.insert_into_parent(path, leaf_id, separator, right_id)
    }

    fn insert_into_parent(
        &mut self,
        mut path: Vec<PageId>,
        left: PageId,
        key: Vec<u8>,
        right: PageId,
    ) -> Result<()> {
        let Some(parent_id) = path.pop() else {
            // The split reached the top: grow a new root.
            let root_guard = self.bpm.new_page(PAGE_TYPE_BTREE)?;
            let root = Node {
                is_leaf: false,
                keys: vec![key],
                values: Vec::new(),
                children: vec![left, right],
            };
            write_node(&mut root_guard.write(), &root, self.key_size)?;
            self.root = root_guard.page_id();
            return Ok(());
        };

        let mut parent = self.read_node(parent_id)?;
        let pos = match parent.keys.binary_search(&key) {
            Ok(pos) | Err(pos) => pos,
        };
        parent.keys.insert(pos, key);
        parent.children.insert(pos + 1, right);

        if parent.keys.len() > self.order - 1 {
            self.split_internal(parent_id, parent, path)
        } else {
            self.write_back(parent_id, &parent)
        }
    }

    /// Internal splits promote the median key instead of copying it down.
    fn split_internal(
        &mut self,
        node_id: PageId,
        mut node: Node,
        path: Vec<PageId>,
    ) -> Result<()> {
        let right_guard = self.bpm.new_page(PAGE_TYPE_BTREE)?;
        let right_id = right_guard.page_id();

        let mid = node.keys.len() / 2;
        let right_keys = node.keys.split_off(mid + 1);
        let promoted = node.keys.pop().expect("split node has a median key");
        let right_children = node.children.split_off(mid + 1);

        let right = Node {
            is_leaf: false,
            keys: right_keys,
            values: Vec::new(),
            children: right_children,
        };

        write_node(&mut right_guard.write(), &right, self.key_size)?;
        drop(right_guard);
        self.write_back(node_id, &node)?;

        self.insert_into_parent(path, node_id, promoted, right_id)
    }

    fn normalize(&self, key: &[u8]) -> Vec<u8> {
        let mut k = vec![0u8; self.key_size];
        let n = key.len().min(self.key_size);
        k[..n].copy_from_slice(&key[..n]);
        k
    }

    fn read_node(&self, page_id: PageId) -> Result<Node> {
        let guard = self.bpm.fetch(page_id)?;
        let page = guard.read();
        read_node(&page, self.key_size)
    }

    fn write_back(&self, page_id: PageId, node: &Node) -> Result<()> {
        let guard = self.bpm.fetch(page_id)?;
        let mut page = guard.write();
        write_node(&mut page, node, self.key_size)
    }
}

fn order_for(key_size: usize) -> usize {
    let usable = PAGE_SIZE - PAGE_HEADER_SIZE - BTREE_HEADER_SIZE;
    (usable / (key_size + RID_SIZE)).max(3)
}

fn read_node(page: &Page, key_size: usize) -> Result<Node> {
    let mut buf = &page.data[PAGE_HEADER_SIZE..];
    let is_leaf = buf.get_u8() == 1;
    let key_count = buf.get_u16_le() as usize;
    buf.advance(1);

    let mut node = Node {
        is_leaf,
        keys: Vec::with_capacity(key_count),
        values: Vec::new(),
        children: Vec::new(),
    };

    let needed = if is_leaf {
        key_count * (key_size + RID_SIZE)
    } else {
        PAGE_ID_SIZE + key_count * (key_size + PAGE_ID_SIZE)
    };
    if buf.remaining() < needed {
        return Err(StorageError::Corruption(format!(
            "btree node on page {} is truncated",
            page.id
        )));
    }

    if is_leaf {
        for _ in 0..key_count {
            node.keys.push(buf[..key_size].to_vec());
            buf.advance(key_size);
            node.values.push(Rid::deserialize(&buf[..RID_SIZE]));
            buf.advance(RID_SIZE);
        }
    } else {
        node.children.push(buf.get_u32_le());
        for _ in 0..key_count {
            node.keys.push(buf[..key_size].to_vec());
            buf.advance(key_size);
            node.children.push(buf.get_u32_le());
        }
    }

    Ok(node)
}

fn write_node(page: &mut Page, node: &Node, key_size: usize) -> Result<()> {
    let mut body = Vec::with_capacity(BTREE_HEADER_SIZE);
    body.put_u8(node.is_leaf as u8);
    body.put_u16_le(node.keys.len() as u16);
    body.put_u8(0);

    if node.is_leaf {
        for (key, rid) in node.keys.iter().zip(&node.values) {
            body.put_slice(key);
            body.put_slice(&rid.serialize());
        }
    } else {
        body.put_u32_le(node.children[0]);
        for (key, child) in node.keys.iter().zip(&node.children[1..]) {
            body.put_slice(key);
            body.put_u32_le(*child);
        }
    }

    if body.len() > PAGE_SIZE - PAGE_HEADER_SIZE {
        return Err(StorageError::Serialization(format!(
            "btree node overflow on page {} ({} bytes)",
            page.id,
            body.len()
        )));
    }

    page.data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + body.len()].copy_from_slice(&body);
    page.is_dirty = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::Pager;
    use tempfile::tempdir;

    fn tree(dir: &std::path::Path, key_size: usize) -> BTree {
        let pager = Arc::new(Pager::open(dir.join("test.db")).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(pager, 64));
        BTree::create(bpm, key_size).unwrap()
    }

    fn rid(n: u16) -> Rid {
        Rid {
            page_id: 1,
            slot_num: n,
            table_id: 1,
        }
    }

    #[test]
    fn insert_then_search() {
        let dir = tempdir().unwrap();
        let mut bt = tree(dir.path(), 8);

        bt.insert(b"aaa", rid(1)).unwrap();
        bt.insert(b"bbb", rid(2)).unwrap();

        assert_eq!(bt.search(b"aaa").unwrap(), Some(rid(1)));
        assert_eq!(bt.search(b"bbb").unwrap(), Some(rid(2)));
        assert_eq!(bt.search(b"ccc").unwrap(), None);
    }

    #[test]
    fn insert_same_key_overwrites() {
        let dir = tempdir().unwrap();
        let mut bt = tree(dir.path(), 8);

        bt.insert(b"key", rid(1)).unwrap();
        bt.insert(b"key", rid(2)).unwrap();

        assert_eq!(bt.search(b"key").unwrap(), Some(rid(2)));
        assert_eq!(bt.scan_all().unwrap().len(), 1);
    }

    #[test]
    fn deleted_key_misses_even_without_flush() {
        let dir = tempdir().unwrap();
        let mut bt = tree(dir.path(), 8);

        bt.insert(b"gone", rid(1)).unwrap();
        assert!(bt.delete(b"gone").unwrap());
        assert_eq!(bt.search(b"gone").unwrap(), None);
        assert!(!bt.delete(b"gone").unwrap());
    }

    #[test]
    fn scan_all_is_inserted_minus_deleted() {
        let dir = tempdir().unwrap();
        let mut bt = tree(dir.path(), 8);

        for i in 0u16..20 {
            bt.insert(&encode_key(&Value::Int(i as i64), 8), rid(i)).unwrap();
        }
        for i in (0u16..20).step_by(2) {
            bt.delete(&encode_key(&Value::Int(i as i64), 8)).unwrap();
        }

        let rids = bt.scan_all().unwrap();
        let mut slots: Vec<u16> = rids.iter().map(|r| r.slot_num).collect();
        slots.sort();
        assert_eq!(slots, (0u16..20).filter(|i| i % 2 == 1).collect::<Vec<_>>());
    }

    #[test]
    fn splits_grow_a_new_root_and_keep_order() {
        let dir = tempdir().unwrap();
        // Key size 500 gives order max(3, 4064/512) = 7, so splits happen
        // quickly and cascade into a new root.
        let mut bt = tree(dir.path(), 500);
        let original_root = bt.root_page_id();

        for i in 0i64..100 {
            bt.insert(&encode_key(&Value::Int(i), 500), rid(i as u16))
                .unwrap();
        }

        assert_ne!(bt.root_page_id(), original_root);
        for i in 0i64..100 {
            assert_eq!(
                bt.search(&encode_key(&Value::Int(i), 500)).unwrap(),
                Some(rid(i as u16)),
                "key {i} lost after splits"
            );
        }

        let rids = bt.scan_all().unwrap();
        let slots: Vec<u16> = rids.iter().map(|r| r.slot_num).collect();
        assert_eq!(slots, (0u16..100).collect::<Vec<_>>());
    }

    #[test]
    fn integer_key_encoding_preserves_order() {
        let values = [-1000i64, -100, -1, 0, 1, 100, 1000];
        let mut encoded: Vec<Vec<u8>> = values
            .iter()
            .map(|v| encode_key(&Value::Int(*v), 8))
            .collect();
        let expected = encoded.clone();
        encoded.sort();
        assert_eq!(encoded, expected);
    }

    #[test]
    fn negative_integer_keys_scan_in_value_order() {
        let dir = tempdir().unwrap();
        let mut bt = tree(dir.path(), 8);

        let keys = [-100i64, -1, 0, 1, 100, 1000];
        // Insert shuffled; scan must come back in value order.
        for v in [100i64, -1, 1000, 0, -100, 1] {
            let pos = keys.iter().position(|k| *k == v).unwrap() as u16;
            bt.insert(&encode_key(&Value::Int(v), 8), rid(pos)).unwrap();
        }

        let rids = bt.scan_all().unwrap();
        let slots: Vec<u16> = rids.iter().map(|r| r.slot_num).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn text_and_bool_key_encoding() {
        let a = encode_key(&Value::Text("apple".to_string()), 8);
        let b = encode_key(&Value::Text("banana".to_string()), 8);
        assert!(a < b);

        let f = encode_key(&Value::Bool(false), 8);
        let t = encode_key(&Value::Bool(true), 8);
        assert!(f < t);
    }

    #[test]
    fn rid_round_trip() {
        let r = Rid {
            page_id: 77,
            slot_num: 12,
            table_id: 3,
        };
        assert_eq!(Rid::deserialize(&r.serialize()), r);
    }
}
