//! Skip list with nodes stored in an arena and linked by index.
//!
//! ```text
//! Level 2:  HEAD ─────────────► c ─────────────► NIL
//! Level 1:  HEAD ──► a ───────► c ──► d ───────► NIL
//! Level 0:  HEAD ──► a ──► b ──► c ──► d ──► e ─► NIL
//! ```
//!
//! Level 0 links every node in key order. Each node draws its height with
//! probability 1/2 per extra level, capped at `max_height`.

use crate::{MemtableError, OrderedMap, Record};
use rand::Rng;

#[derive(Debug)]
struct SkipNode {
    record: Record,
    forward: Vec<Option<usize>>,
}

/// Skip-list backed ordered map.
#[derive(Debug)]
pub struct SkipList {
    nodes: Vec<SkipNode>,
    /// Forward links of the head sentinel, one per possible level.
    head: Vec<Option<usize>>,
    /// Number of levels currently in use.
    height: usize,
    max_height: usize,
}

impl SkipList {
    pub fn new(max_height: usize) -> Self {
        let max_height = max_height.max(1);
        Self {
            nodes: Vec::new(),
            head: vec![None; max_height],
            height: 1,
            max_height,
        }
    }

    /// Tallest tower currently linked; useful for checking the height cap.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    fn next(&self, from: Option<usize>, level: usize) -> Option<usize> {
        match from {
            None => self.head[level],
            Some(i) => self.nodes[i].forward[level],
        }
    }

    fn set_next(&mut self, from: Option<usize>, level: usize, to: Option<usize>) {
        match from {
            None => self.head[level] = to,
            Some(i) => self.nodes[i].forward[level] = to,
        }
    }

    /// Last node with a key below `key` at every level (`None` = head).
    fn predecessors(&self, key: &[u8]) -> Vec<Option<usize>> {
        let mut update = vec![None; self.max_height];
        let mut cur = None;
        for level in (0..self.height).rev() {
            while let Some(n) = self.next(cur, level) {
                if self.nodes[n].record.key.as_slice() >= key {
                    break;
                }
                cur = Some(n);
            }
            update[level] = cur;
        }
        update
    }

    fn find_index(&self, key: &[u8]) -> Option<usize> {
        let mut cur = None;
        for level in (0..self.height).rev() {
            while let Some(n) = self.next(cur, level) {
                if self.nodes[n].record.key.as_slice() >= key {
                    break;
                }
                cur = Some(n);
            }
        }
        self.next(cur, 0).filter(|&n| self.nodes[n].record.key == key)
    }

    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < self.max_height && rng.gen_bool(0.5) {
            height += 1;
        }
        height
    }

    /// Arena indices in key order.
    fn order(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut cur = self.head[0];
        while let Some(n) = cur {
            out.push(n);
            cur = self.nodes[n].forward[0];
        }
        out
    }
}

impl OrderedMap for SkipList {
    fn insert(&mut self, record: Record) -> Result<(), MemtableError> {
        let update = self.predecessors(&record.key);

        if let Some(n) = self.next(update[0], 0) {
            if self.nodes[n].record.key == record.key {
                self.nodes[n].record = record;
                return Ok(());
            }
        }

        // Levels above the current height already point at the head.
        let height = self.random_height();
        self.height = self.height.max(height);

        let idx = self.nodes.len();
        let forward = (0..height).map(|level| self.next(update[level], level)).collect();
        self.nodes.push(SkipNode { record, forward });
        for (level, &pred) in update.iter().enumerate().take(height) {
            self.set_next(pred, level, Some(idx));
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Option<&Record> {
        self.find_index(key).map(|n| &self.nodes[n].record)
    }

    fn mark_deleted(&mut self, key: &[u8], timestamp: u64) -> Result<(), MemtableError> {
        let n = self.find_index(key).ok_or(MemtableError::NotFound)?;
        let record = &mut self.nodes[n].record;
        record.tombstone = true;
        record.value.clear();
        record.timestamp = record.timestamp.max(timestamp);
        Ok(())
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn records(&self) -> Vec<Record> {
        self.order()
            .into_iter()
            .map(|n| self.nodes[n].record.clone())
            .collect()
    }

    fn drain_sorted(&mut self) -> Vec<Record> {
        let order = self.order();
        let mut slots: Vec<Option<Record>> = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(|node| Some(node.record))
            .collect();
        self.head.iter_mut().for_each(|h| *h = None);
        self.height = 1;
        order.into_iter().filter_map(|n| slots[n].take()).collect()
    }
}
