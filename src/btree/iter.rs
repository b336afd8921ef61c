use std::cmp::Ordering;

use log::error;

use crate::{
    btree::{
        consts::MAX_LEVEL,
        page::{InternalView, LeafView},
        tree::BTree,
    },
    error::MicroError,
    medium::BlockMedium,
};

enum Step {
    Yield,
    PastMax,
    LeafDone,
}

/// Stateful range cursor: one `(page, index)` pair per level, positioned
/// by `BTree::range`. Observes the tree as of its creation; mutating the
/// tree while iterating is not supported.
pub struct RangeIter<'a, M: BlockMedium> {
    tree: &'a mut BTree<M>,
    stack: [(u32, usize); MAX_LEVEL],
    depth: usize,
    leaf: u32,
    leaf_idx: usize,
    max_key: Option<Vec<u8>>,
    done: bool,
}

impl<M: BlockMedium> BTree<M> {
    /// Cursor over all records with `min_key <= key <= max_key`; either
    /// bound may be absent.
    pub fn range(
        &mut self,
        min_key: Option<&[u8]>,
        max_key: Option<&[u8]>,
    ) -> Result<RangeIter<'_, M>, MicroError> {
        for bound in [min_key, max_key].iter().flatten() {
            if bound.len() != self.state.lay.key_size {
                return Err(MicroError::new("range bound does not match the key size"));
            }
        }

        let depth = self.state.levels - 1;
        let mut stack = [(0u32, 0usize); MAX_LEVEL];
        let mut pid = self.state.active_path[0];
        for frame in stack.iter_mut().take(depth) {
            let (stored, idx) = {
                let page = self.store.read(pid)?;
                let view = InternalView::new(page, self.state.lay);
                let idx = match min_key {
                    Some(k) => view.search_child(k, self.state.compare),
                    None => 0,
                };
                (view.child(idx), idx)
            };
            *frame = (pid, idx);
            pid = self.state.resolve(&mut self.store, stored)?;
        }

        let leaf_idx = {
            let page = self.store.read(pid)?;
            let leaf = LeafView::new(page, self.state.lay);
            match min_key {
                None => 0,
                Some(k) => match leaf.search_range(k, self.state.compare) {
                    // every record is >= the bound
                    None => 0,
                    Some(i) => {
                        if (self.state.compare)(leaf.key(i), k) == Ordering::Equal {
                            i
                        } else {
                            i + 1
                        }
                    }
                },
            }
        };

        Ok(RangeIter {
            tree: self,
            stack,
            depth,
            leaf: pid,
            leaf_idx,
            max_key: max_key.map(|k| k.to_vec()),
            done: false,
        })
    }
}

impl<'a, M: BlockMedium> RangeIter<'a, M> {
    /// Copy the next in-range record into the caller's buffers. Returns
    /// false once the range is exhausted.
    pub fn next_into(
        &mut self,
        key_out: &mut [u8],
        value_out: &mut [u8],
    ) -> Result<bool, MicroError> {
        if self.done {
            return Ok(false);
        }
        loop {
            let step = {
                let lay = self.tree.state.lay;
                let cmp = self.tree.state.compare;
                let page = self.tree.store.read(self.leaf)?;
                let leaf = LeafView::new(page, lay);
                if self.leaf_idx >= leaf.count() {
                    Step::LeafDone
                } else {
                    let key = leaf.key(self.leaf_idx);
                    let past = self
                        .max_key
                        .as_ref()
                        .map_or(false, |m| cmp(key, m) == Ordering::Greater);
                    if past {
                        Step::PastMax
                    } else {
                        key_out.copy_from_slice(key);
                        value_out.copy_from_slice(leaf.value(self.leaf_idx));
                        Step::Yield
                    }
                }
            };
            match step {
                Step::Yield => {
                    self.leaf_idx += 1;
                    return Ok(true);
                }
                Step::PastMax => {
                    self.done = true;
                    return Ok(false);
                }
                Step::LeafDone => {
                    if !self.advance_leaf()? {
                        self.done = true;
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Walk up the stored path until a level has a further child, then
    /// re-descend along the leftmost edge.
    fn advance_leaf(&mut self) -> Result<bool, MicroError> {
        let lay = self.tree.state.lay;
        let mut lvl = self.depth;
        loop {
            if lvl == 0 {
                return Ok(false);
            }
            lvl -= 1;
            let (pid, idx) = self.stack[lvl];
            let n_keys = {
                let page = self.tree.store.read(pid)?;
                InternalView::new(page, lay).key_count()
            };
            if idx >= n_keys {
                continue;
            }
            self.stack[lvl].1 = idx + 1;

            let stored = {
                let page = self.tree.store.read(pid)?;
                InternalView::new(page, lay).child(idx + 1)
            };
            let mut child = self.tree.state.resolve(&mut self.tree.store, stored)?;
            for l in lvl + 1..self.depth {
                self.stack[l] = (child, 0);
                let stored = {
                    let page = self.tree.store.read(child)?;
                    InternalView::new(page, lay).child(0)
                };
                child = self.tree.state.resolve(&mut self.tree.store, stored)?;
            }
            self.leaf = child;
            self.leaf_idx = 0;
            return Ok(true);
        }
    }
}

impl<'a, M: BlockMedium> Iterator for RangeIter<'a, M> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let mut key = vec![0; self.tree.state.lay.key_size];
        let mut value = vec![0; self.tree.state.lay.data_size];
        match self.next_into(&mut key, &mut value) {
            Ok(true) => Some((key, value)),
            Ok(false) => None,
            Err(e) => {
                error!("range iterator stopped on error: {}", e);
                None
            }
        }
    }
}
