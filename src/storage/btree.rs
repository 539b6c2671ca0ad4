//! B-tree secondary index (C5): an ordered multi-map `key -> list<bytes>`,
//! minimum degree `t >= 2`, with persistence and in-order traversal.
//!
//! Node key arrays stay sorted; inserting an existing key never grows the
//! tree height; deletion is not part of the contract — indexes are rebuilt
//! wholesale by repartition/bulk operations instead.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::NyaruResult;
use crate::storage::codec::{self, CompressionMethod};
use crate::storage::shard::write_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Node<K> {
    keys: Vec<K>,
    values: Vec<Vec<Vec<u8>>>,
    children: Vec<Node<K>>,
    is_leaf: bool,
}

impl<K: Ord + Clone> Node<K> {
    fn leaf() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            is_leaf: true,
        }
    }

    fn total_count(&self) -> usize {
        let mut total: usize = self.values.iter().map(|v| v.len()).sum();
        for child in &self.children {
            total += child.total_count();
        }
        total
    }

    fn in_order_into(&self, out: &mut Vec<Vec<u8>>) {
        if self.is_leaf {
            for value_list in &self.values {
                out.extend(value_list.iter().cloned());
            }
            return;
        }
        for i in 0..self.keys.len() {
            self.children[i].in_order_into(out);
            out.extend(self.values[i].iter().cloned());
        }
        self.children[self.keys.len()].in_order_into(out);
    }
}

/// Generic ordered multi-map: `key -> list<bytes>`.
#[derive(Debug, Clone)]
pub struct BTreeIndex<K> {
    root: Node<K>,
    t: usize,
}

impl<K: Ord + Clone + Serialize + for<'de> Deserialize<'de>> BTreeIndex<K> {
    pub fn new(t: usize) -> Self {
        assert!(t >= 2, "minimum degree must be at least 2");
        Self {
            root: Node::leaf(),
            t,
        }
    }

    pub fn search(&self, key: &K) -> Option<Vec<Vec<u8>>> {
        let mut node = &self.root;
        loop {
            match node.keys.binary_search(key) {
                Ok(idx) => return Some(node.values[idx].clone()),
                Err(idx) => {
                    if node.is_leaf {
                        return None;
                    }
                    node = &node.children[idx];
                }
            }
        }
    }

    fn find_mut(&mut self, key: &K) -> Option<&mut Vec<Vec<u8>>> {
        let mut node = &mut self.root;
        loop {
            match node.keys.binary_search(key) {
                Ok(idx) => return Some(&mut node.values[idx]),
                Err(idx) => {
                    if node.is_leaf {
                        return None;
                    }
                    node = &mut node.children[idx];
                }
            }
        }
    }

    /// Insert-or-append: if `key` exists anywhere in the tree, `payload` is
    /// appended to its value list; otherwise classical B-tree insertion runs,
    /// proactively splitting the root when it is full.
    pub fn insert(&mut self, key: K, payload: Vec<u8>) {
        if let Some(values) = self.find_mut(&key) {
            values.push(payload);
            return;
        }

        if self.root.keys.len() == 2 * self.t - 1 {
            let old_root = std::mem::replace(&mut self.root, Node::leaf());
            let mut new_root = Node {
                keys: Vec::new(),
                values: Vec::new(),
                children: vec![old_root],
                is_leaf: false,
            };
            Self::split_child(&mut new_root, 0, self.t);
            self.root = new_root;
        }
        Self::insert_non_full(&mut self.root, key, payload, self.t);
    }

    fn split_child(parent: &mut Node<K>, i: usize, t: usize) {
        let mid = t - 1;
        let right_keys = parent.children[i].keys.split_off(mid + 1);
        let right_values = parent.children[i].values.split_off(mid + 1);
        let median_key = parent.children[i].keys.pop().unwrap();
        let median_values = parent.children[i].values.pop().unwrap();
        let right_children = if parent.children[i].is_leaf {
            Vec::new()
        } else {
            parent.children[i].children.split_off(mid + 1)
        };
        let right_is_leaf = parent.children[i].is_leaf;

        let right_node = Node {
            keys: right_keys,
            values: right_values,
            children: right_children,
            is_leaf: right_is_leaf,
        };

        parent.keys.insert(i, median_key);
        parent.values.insert(i, median_values);
        parent.children.insert(i + 1, right_node);
    }

    fn insert_non_full(node: &mut Node<K>, key: K, payload: Vec<u8>, t: usize) {
        if node.is_leaf {
            let pos = node.keys.binary_search(&key).unwrap_or_else(|p| p);
            node.keys.insert(pos, key);
            node.values.insert(pos, vec![payload]);
            return;
        }

        let mut pos = node.keys.binary_search(&key).unwrap_or_else(|p| p);
        if node.children[pos].keys.len() == 2 * t - 1 {
            Self::split_child(node, pos, t);
            if key > node.keys[pos] {
                pos += 1;
            }
        }
        Self::insert_non_full(&mut node.children[pos], key, payload, t);
    }

    pub fn in_order(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        self.root.in_order_into(&mut out);
        out
    }

    pub fn page(&self, offset: usize, limit: usize) -> Vec<Vec<u8>> {
        let all = self.in_order();
        if offset >= all.len() {
            return Vec::new();
        }
        let end = (offset + limit).min(all.len());
        all[offset..end].to_vec()
    }

    pub fn total_count(&self) -> usize {
        self.root.total_count()
    }

    pub async fn persist(&self, path: &Path) -> NyaruResult<()> {
        let json = serde_json::to_vec(&self.root)?;
        let compressed = codec::compress(&json, CompressionMethod::Gzip)?;
        write_atomic(path, &compressed).await
    }

    pub async fn load(path: &Path, t: usize) -> NyaruResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        let json = codec::decompress(&bytes, CompressionMethod::Gzip)?;
        let root: Node<K> = serde_json::from_slice(&json)?;
        Ok(Self { root, t })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn in_order_is_nondecreasing_and_total_count_matches() {
        let mut tree: BTreeIndex<String> = BTreeIndex::new(2);
        for (k, v) in [("banana", "b1"), ("apple", "a1"), ("carrot", "c1"), ("apple", "a2")] {
            tree.insert(k.to_string(), payload(v));
        }
        assert_eq!(tree.total_count(), 4);
        assert_eq!(
            tree.search(&"apple".to_string()).unwrap(),
            vec![payload("a1"), payload("a2")]
        );
        assert_eq!(tree.in_order().len(), 4);
    }

    #[test]
    fn insert_existing_key_never_grows_height_and_appends() {
        let mut tree: BTreeIndex<i32> = BTreeIndex::new(2);
        for i in 0..50 {
            tree.insert(i % 5, payload(&i.to_string()));
        }
        assert_eq!(tree.total_count(), 50);
        assert_eq!(tree.search(&0).unwrap().len(), 10);
    }

    #[test]
    fn page_slices_in_order_results() {
        let mut tree: BTreeIndex<i32> = BTreeIndex::new(2);
        for i in 0..10 {
            tree.insert(i, payload(&i.to_string()));
        }
        assert_eq!(tree.page(0, 3).len(), 3);
        assert_eq!(tree.page(8, 5).len(), 2);
        assert_eq!(tree.page(20, 5).len(), 0);
    }

    #[test]
    fn many_inserts_trigger_splits_and_stay_ordered() {
        let mut tree: BTreeIndex<i32> = BTreeIndex::new(2);
        let mut keys: Vec<i32> = (0..500).collect();
        // Deterministic shuffle.
        keys.sort_by_key(|k| (k * 2654435761i64) as i32);
        for k in &keys {
            tree.insert(*k, payload(&k.to_string()));
        }
        let order = tree.in_order();
        assert_eq!(order.len(), 500);
        for k in 0..500 {
            assert!(tree.search(&k).is_some());
        }
    }

    #[tokio::test]
    async fn persist_then_load_preserves_order_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("name.idx");
        let mut tree: BTreeIndex<String> = BTreeIndex::new(2);
        for k in ["apple", "carrot", "banana"] {
            tree.insert(k.to_string(), payload(k));
        }
        tree.persist(&path).await.unwrap();

        let loaded: BTreeIndex<String> = BTreeIndex::load(&path, 2).await.unwrap();
        assert_eq!(loaded.in_order(), tree.in_order());
        for k in ["apple", "banana", "carrot"] {
            assert_eq!(loaded.search(&k.to_string()), tree.search(&k.to_string()));
        }
    }
}
