//! Multiway search tree (B-tree) keyed by record key.
//!
//! With minimum degree `t`, every node except the root holds between `t - 1`
//! and `2t - 1` records, and an internal node with `n` records has `n + 1`
//! children. Inserts split full nodes on the way down, so a split never has
//! to propagate upwards. [`BTree::remove`] keeps the lower bound on the way
//! down by borrowing from a sibling (rotation) or merging two siblings.

use crate::{MemtableError, OrderedMap, Record};

#[derive(Debug, Default)]
struct Node {
    records: Vec<Record>,
    /// Empty for leaves.
    children: Vec<Node>,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn search(&self, key: &[u8]) -> Result<usize, usize> {
        self.records.binary_search_by(|r| r.key.as_slice().cmp(key))
    }

    fn find(&self, key: &[u8]) -> Option<&Record> {
        let mut node = self;
        loop {
            match node.search(key) {
                Ok(i) => return Some(&node.records[i]),
                Err(_) if node.is_leaf() => return None,
                Err(i) => node = &node.children[i],
            }
        }
    }

    fn find_mut(&mut self, key: &[u8]) -> Option<&mut Record> {
        let mut node = self;
        loop {
            match node.search(key) {
                Ok(i) => return Some(&mut node.records[i]),
                Err(_) if node.is_leaf() => return None,
                Err(i) => node = &mut node.children[i],
            }
        }
    }

    /// Splits the full child `i` around its median, which moves up into
    /// `self` at position `i`.
    fn split_child(&mut self, i: usize, degree: usize) {
        let child = &mut self.children[i];
        let right_records = child.records.split_off(degree);
        let right_children = if child.is_leaf() {
            Vec::new()
        } else {
            child.children.split_off(degree)
        };
        let median = child
            .records
            .pop()
            .expect("full node holds 2t-1 records");

        self.records.insert(i, median);
        self.children.insert(
            i + 1,
            Node {
                records: right_records,
                children: right_children,
            },
        );
    }

    /// Inserts a key known to be absent into a node that is not full.
    fn insert_non_full(&mut self, record: Record, degree: usize) {
        let mut node = self;
        loop {
            let mut pos = match node.search(&record.key) {
                Ok(i) | Err(i) => i,
            };
            if node.is_leaf() {
                node.records.insert(pos, record);
                return;
            }
            if node.children[pos].records.len() == 2 * degree - 1 {
                node.split_child(pos, degree);
                if record.key.as_slice() > node.records[pos].key.as_slice() {
                    pos += 1;
                }
            }
            node = &mut node.children[pos];
        }
    }

    fn remove(&mut self, key: &[u8], degree: usize) -> Option<Record> {
        match self.search(key) {
            Ok(i) if self.is_leaf() => Some(self.records.remove(i)),
            Ok(i) => {
                if self.children[i].records.len() >= degree {
                    let pred_key = self.children[i].max_key().to_vec();
                    let pred = self.children[i].remove(&pred_key, degree)?;
                    Some(std::mem::replace(&mut self.records[i], pred))
                } else if self.children[i + 1].records.len() >= degree {
                    let succ_key = self.children[i + 1].min_key().to_vec();
                    let succ = self.children[i + 1].remove(&succ_key, degree)?;
                    Some(std::mem::replace(&mut self.records[i], succ))
                } else {
                    self.merge_children(i);
                    self.children[i].remove(key, degree)
                }
            }
            Err(_) if self.is_leaf() => None,
            Err(i) => {
                let i = if self.children[i].records.len() < degree {
                    self.fill_child(i, degree)
                } else {
                    i
                };
                self.children[i].remove(key, degree)
            }
        }
    }

    fn max_key(&self) -> &[u8] {
        let mut node = self;
        while !node.is_leaf() {
            node = node.children.last().expect("internal node has children");
        }
        &node.records.last().expect("non-empty leaf").key
    }

    fn min_key(&self) -> &[u8] {
        let mut node = self;
        while !node.is_leaf() {
            node = &node.children[0];
        }
        &node.records[0].key
    }

    /// Brings child `i` up to at least `degree` records. Returns the index
    /// the child ends up at (it shifts left after merging with its left
    /// sibling).
    fn fill_child(&mut self, i: usize, degree: usize) -> usize {
        if i > 0 && self.children[i - 1].records.len() >= degree {
            self.rotate_right(i);
            i
        } else if i + 1 < self.children.len() && self.children[i + 1].records.len() >= degree {
            self.rotate_left(i);
            i
        } else if i + 1 < self.children.len() {
            self.merge_children(i);
            i
        } else {
            self.merge_children(i - 1);
            i - 1
        }
    }

    /// Moves the separator `i - 1` down into child `i` and the last record
    /// of child `i - 1` up in its place.
    fn rotate_right(&mut self, i: usize) {
        let (left, right) = self.children.split_at_mut(i);
        let sibling = &mut left[i - 1];
        let child = &mut right[0];

        let borrowed = sibling.records.pop().expect("sibling has spare records");
        let separator = std::mem::replace(&mut self.records[i - 1], borrowed);
        child.records.insert(0, separator);
        if let Some(grandchild) = sibling.children.pop() {
            child.children.insert(0, grandchild);
        }
    }

    /// Mirror of [`rotate_right`](Self::rotate_right) using child `i + 1`.
    fn rotate_left(&mut self, i: usize) {
        let (left, right) = self.children.split_at_mut(i + 1);
        let child = &mut left[i];
        let sibling = &mut right[0];

        let borrowed = sibling.records.remove(0);
        let separator = std::mem::replace(&mut self.records[i], borrowed);
        child.records.push(separator);
        if !sibling.is_leaf() {
            child.children.push(sibling.children.remove(0));
        }
    }

    /// Folds separator `i` and child `i + 1` into child `i`.
    fn merge_children(&mut self, i: usize) {
        let right = self.children.remove(i + 1);
        let separator = self.records.remove(i);
        let left = &mut self.children[i];
        left.records.push(separator);
        left.records.extend(right.records);
        left.children.extend(right.children);
    }

    fn collect_into(&self, out: &mut Vec<Record>) {
        for (i, record) in self.records.iter().enumerate() {
            if let Some(child) = self.children.get(i) {
                child.collect_into(out);
            }
            out.push(record.clone());
        }
        if let Some(last) = self.children.get(self.records.len()) {
            last.collect_into(out);
        }
    }

    fn drain_into(self, out: &mut Vec<Record>) {
        let mut children = self.children.into_iter();
        for record in self.records {
            if let Some(child) = children.next() {
                child.drain_into(out);
            }
            out.push(record);
        }
        if let Some(last) = children.next() {
            last.drain_into(out);
        }
    }

    fn height(&self) -> usize {
        1 + self.children.first().map_or(0, Node::height)
    }
}

/// B-tree backed ordered map.
#[derive(Debug)]
pub struct BTree {
    root: Node,
    degree: usize,
    len: usize,
}

impl BTree {
    /// Creates an empty tree of minimum degree `degree` (at least 2).
    pub fn new(degree: usize) -> Self {
        Self {
            root: Node::default(),
            degree: degree.max(2),
            len: 0,
        }
    }

    /// Physically removes `key`, rebalancing on underflow.
    pub fn remove(&mut self, key: &[u8]) -> Option<Record> {
        let removed = self.root.remove(key, self.degree);
        if self.root.records.is_empty() && !self.root.is_leaf() {
            self.root = self.root.children.remove(0);
        }
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Number of node levels; 1 for a lone root.
    #[must_use]
    pub fn height(&self) -> usize {
        self.root.height()
    }
}

impl OrderedMap for BTree {
    fn insert(&mut self, record: Record) -> Result<(), MemtableError> {
        if let Some(existing) = self.root.find_mut(&record.key) {
            *existing = record;
            return Ok(());
        }

        if self.root.records.len() == 2 * self.degree - 1 {
            let old_root = std::mem::take(&mut self.root);
            self.root.children.push(old_root);
            self.root.split_child(0, self.degree);
        }
        self.root.insert_non_full(record, self.degree);
        self.len += 1;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Option<&Record> {
        self.root.find(key)
    }

    fn mark_deleted(&mut self, key: &[u8], timestamp: u64) -> Result<(), MemtableError> {
        let record = self.root.find_mut(key).ok_or(MemtableError::NotFound)?;
        record.tombstone = true;
        record.value.clear();
        record.timestamp = record.timestamp.max(timestamp);
        Ok(())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn records(&self) -> Vec<Record> {
        let mut out = Vec::with_capacity(self.len);
        self.root.collect_into(&mut out);
        out
    }

    fn drain_sorted(&mut self) -> Vec<Record> {
        let mut out = Vec::with_capacity(self.len);
        std::mem::take(&mut self.root).drain_into(&mut out);
        self.len = 0;
        out
    }
}
