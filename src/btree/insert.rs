use std::mem;

use log::debug;

use crate::{
    btree::{
        consts::{INDEX_SIZE, SENTINEL_PAGE},
        page::{header, InternalView, InternalViewMut, LeafView, LeafViewMut},
        page_store::PageStore,
        tree::TreeState,
    },
    error::MicroError,
    medium::BlockMedium,
    types::MicroResult,
};

impl TreeState {
    /// Insert a record, descending along the active path and splitting
    /// upward from the leaf when nodes run out of room.
    pub(crate) fn put<M: BlockMedium>(
        &mut self,
        store: &mut PageStore<M>,
        key: &[u8],
        value: &[u8],
    ) -> MicroResult {
        if self.num_nodes as u64 * 2 >= store.pages() as u64 {
            return Err(MicroError::new("capacity: tree would exceed the safe fill ratio"));
        }

        // descend, recording every internal node visited
        self.path_len = 0;
        let mut pid = self.active_path[0];
        for _ in 0..self.levels - 1 {
            self.active_path[self.path_len] = pid;
            self.path_len += 1;
            let stored = {
                let page = store.read(pid)?;
                let view = InternalView::new(page, self.lay);
                view.child(view.search_child(key, self.compare))
            };
            pid = self.resolve(store, stored)?;
        }

        self.rewrite_src = pid;
        let lay = self.lay;
        let cmp = self.compare;

        let (found, pos, count) = {
            let buf = store.read_into(pid, 0)?;
            let view = LeafView::new(buf, lay);
            match view.search(key, cmp) {
                Some(i) => (true, i, view.count()),
                None => (false, view.insert_pos(key, cmp), view.count()),
            }
        };

        if found {
            // last write wins on an existing key
            let buf = store.slot_data_mut(0);
            LeafViewMut::new(buf, lay).set_value(pos, value);
            return self.rewrite_leaf(store);
        }
        if count < lay.leaf_cap {
            let buf = store.slot_data_mut(0);
            LeafViewMut::new(buf, lay).insert_record(pos, key, value);
            return self.rewrite_leaf(store);
        }
        self.split_leaf(store, pos, key, value)
    }

    /// Persist the modified leaf sitting in buffer slot 0. The root leaf
    /// is overwritten in place; any other leaf is appended as a fresh
    /// copy with a redirect for its parent.
    fn rewrite_leaf<M: BlockMedium>(&mut self, store: &mut PageStore<M>) -> MicroResult {
        if self.levels == 1 {
            let root = self.active_path[0];
            store.overwrite_slot(0, root)?;
            self.rewrite_src = SENTINEL_PAGE;
            return Ok(());
        }
        {
            let buf = store.slot_data_mut(0);
            self.stamp_lineage(buf);
        }
        let new = store.write_from_slot(self, 0)?;
        let stamped = header::prev_id(store.slot_data(0));
        self.settle_rewrite(store, stamped, new)
    }

    /// Split the full leaf in slot 0. Both halves are appended; the old
    /// page becomes garbage once the separator reaches the parent.
    fn split_leaf<M: BlockMedium>(
        &mut self,
        store: &mut PageStore<M>,
        pos: usize,
        key: &[u8],
        value: &[u8],
    ) -> MicroResult {
        let lay = self.lay;
        let count = lay.leaf_cap;
        let mid = count / 2;

        self.temp_record[..lay.key_size].copy_from_slice(key);
        self.temp_record[lay.key_size..lay.record_size].copy_from_slice(value);

        // compose the right half in the split scratch; record `pos` of
        // the virtual sequence is the incoming record
        let mut scratch = mem::take(&mut self.split_scratch);
        {
            let src = store.slot_data(0);
            for b in scratch.iter_mut() {
                *b = 0;
            }
            header::init_node(&mut scratch, false, false);
            let right_count = count + 1 - mid;
            let mut right = LeafViewMut::new(&mut scratch, lay);
            for j in 0..right_count {
                let v = mid + j;
                let rec: &[u8] = if v < pos {
                    &src[lay.record_off(v)..lay.record_off(v) + lay.record_size]
                } else if v == pos {
                    &self.temp_record
                } else {
                    &src[lay.record_off(v - 1)..lay.record_off(v - 1) + lay.record_size]
                };
                right.put_record(j, rec);
            }
            right.set_count(right_count);
        }

        // the smallest key of the right half is promoted
        self.temp_key
            .copy_from_slice(&scratch[lay.record_off(0)..lay.record_off(0) + lay.key_size]);

        let right_pid = store.write_from(self, &mut scratch)?;
        self.split_scratch = scratch;

        // rebuild the left half in place
        {
            let buf = store.slot_data_mut(0);
            if pos < mid {
                let start = lay.record_off(pos);
                let end = lay.record_off(mid - 1);
                buf.copy_within(start..end, start + lay.record_size);
                buf[start..start + lay.record_size].copy_from_slice(&self.temp_record);
            }
            header::set_prev_id(buf, SENTINEL_PAGE);
            header::set_next_id(buf, SENTINEL_PAGE);
            header::set_root_flag(buf, false);
            header::set_record_count(buf, mid);
        }
        let left_pid = store.write_from_slot(self, 0)?;
        self.num_nodes += 1;
        self.rewrite_src = SENTINEL_PAGE;
        debug!(
            "leaf split: left {} right {} ({} levels)",
            left_pid, right_pid, self.levels
        );

        self.promote(store, left_pid, right_pid)
    }

    /// Walk the active path upward placing the separator held in
    /// `temp_key`, splitting ancestors that are full.
    fn promote<M: BlockMedium>(
        &mut self,
        store: &mut PageStore<M>,
        left: u32,
        right: u32,
    ) -> MicroResult {
        let mut left = left;
        let mut right = right;
        let lay = self.lay;
        let cmp = self.compare;

        for i in (0..self.path_len).rev() {
            // an earlier recycling pass may have moved this ancestor
            let a = self.resolve(store, self.active_path[i])?;
            self.rewrite_src = a;

            let (n_keys, idx) = {
                let buf = store.read_into(a, 0)?;
                self.update_pointers(buf);
                let view = InternalView::new(buf, lay);
                let idx = view.search_child(&self.temp_key, cmp);
                (view.key_count(), idx)
            };

            let full = n_keys == lay.internal_cap;
            {
                let buf = store.slot_data_mut(0);
                let mut view = InternalViewMut::new(buf, lay);
                view.set_child(idx, left);
                if !full {
                    view.insert_entry(idx, &self.temp_key, right);
                }
            }

            if !full {
                if i == 0 {
                    // the root is rewritten in place
                    store.overwrite_slot(0, a)?;
                    self.rewrite_src = SENTINEL_PAGE;
                } else {
                    {
                        let buf = store.slot_data_mut(0);
                        self.stamp_lineage(buf);
                    }
                    let new = store.write_from_slot(self, 0)?;
                    let stamped = header::prev_id(store.slot_data(0));
                    self.settle_rewrite(store, stamped, new)?;
                    self.active_path[i] = new;
                }
                return Ok(());
            }

            let (l, r) = self.split_internal(store, idx, right)?;
            left = l;
            right = r;
        }

        self.grow_root(store, left, right)
    }

    /// Split the full internal node in slot 0. The separator in
    /// `temp_key` goes in at key slot `idx` (child `idx` already points
    /// at the left half of the lower split); on return `temp_key` holds
    /// the key promoted out of this node.
    fn split_internal<M: BlockMedium>(
        &mut self,
        store: &mut PageStore<M>,
        idx: usize,
        right_child: u32,
    ) -> Result<(u32, u32), MicroError> {
        let lay = self.lay;
        let f = lay.internal_cap;
        // middle of the virtual sequence of f + 1 keys
        let m = (f + 1) / 2;

        let mut scratch = mem::take(&mut self.split_scratch);
        {
            let src = store.slot_data(0);
            for b in scratch.iter_mut() {
                *b = 0;
            }
            header::init_node(&mut scratch, true, false);
            let right_keys = f - m;
            let mut right = InternalViewMut::new(&mut scratch, lay);
            for j in 0..right_keys {
                let v = m + 1 + j;
                let k: &[u8] = if v < idx {
                    &src[lay.key_off(v)..lay.key_off(v) + lay.key_size]
                } else if v == idx {
                    &self.temp_key
                } else {
                    &src[lay.key_off(v - 1)..lay.key_off(v - 1) + lay.key_size]
                };
                right.set_key(j, k);
            }
            for j in 0..=right_keys {
                let w = m + 1 + j;
                let c = if w <= idx {
                    InternalView::new(src, lay).child(w)
                } else if w == idx + 1 {
                    right_child
                } else {
                    InternalView::new(src, lay).child(w - 1)
                };
                right.set_child(j, c);
            }
            right.set_count(right_keys);
        }
        let right_pid = store.write_from(self, &mut scratch)?;
        self.split_scratch = scratch;

        // save the promoted key (virtual key m) before the left rebuild
        // disturbs the slot; when idx == m the incoming key is promoted
        // and temp_key already holds it
        if idx != m {
            let v = if m < idx { m } else { m - 1 };
            let src = store.slot_data(0);
            self.probe_key
                .copy_from_slice(&src[lay.key_off(v)..lay.key_off(v) + lay.key_size]);
        }

        // rebuild the left half in place
        {
            let buf = store.slot_data_mut(0);
            if idx < m {
                let ks = lay.key_off(idx);
                let ke = lay.key_off(m - 1);
                buf.copy_within(ks..ke, ks + lay.key_size);
                buf[ks..ks + lay.key_size].copy_from_slice(&self.temp_key);

                let cs = lay.child_off(idx + 1);
                let ce = lay.child_off(m);
                buf.copy_within(cs..ce, cs + INDEX_SIZE);
                buf[cs..cs + INDEX_SIZE].copy_from_slice(&right_child.to_ne_bytes());
            }
            header::set_prev_id(buf, SENTINEL_PAGE);
            header::set_next_id(buf, SENTINEL_PAGE);
            header::set_root_flag(buf, false);
            header::set_record_count(buf, m);
        }
        if idx != m {
            self.temp_key.copy_from_slice(&self.probe_key);
        }

        let left_pid = store.write_from_slot(self, 0)?;
        self.num_nodes += 1;
        self.rewrite_src = SENTINEL_PAGE;
        debug!("internal split: left {} right {}", left_pid, right_pid);
        Ok((left_pid, right_pid))
    }

    /// The split reached the top: start a new root with one separator.
    fn grow_root<M: BlockMedium>(
        &mut self,
        store: &mut PageStore<M>,
        left: u32,
        right: u32,
    ) -> MicroResult {
        if self.levels >= crate::btree::consts::MAX_LEVEL {
            return Err(MicroError::new("tree exceeded the depth limit"));
        }
        {
            let buf = store.slot_data_mut(0);
            for b in buf.iter_mut() {
                *b = 0;
            }
            header::init_node(buf, true, true);
            let mut view = InternalViewMut::new(buf, self.lay);
            view.set_key(0, &self.temp_key);
            view.set_child(0, left);
            view.set_child(1, right);
            view.set_count(1);
        }
        let new_root = store.write_from_slot(self, 0)?;
        self.num_nodes += 1;
        self.levels += 1;
        self.active_path[0] = new_root;
        store.pin_root(new_root);
        debug!("new root {} ({} levels)", new_root, self.levels);
        Ok(())
    }
}
