use std::cmp::Ordering;
use std::mem;

use log::{debug, info};

use crate::{
    btree::{
        consts::{MAX_CHAIN_HOPS, MAX_LEVEL, OFF_NEXT_ID, PAGE_HEADER_SIZE, SENTINEL_PAGE},
        mapping::MappingTable,
        page::{header, InternalView, InternalViewMut, LeafView, PageLayout},
        page_store::{MovedPage, NodeHooks, PageStatus, PageStore, StoreStats},
        KeyComparator, TreeConfig,
    },
    error::MicroError,
    medium::BlockMedium,
    types::MicroResult,
};

/// Engine state that is independent of the backing medium: the derived
/// layout, the active path, the remapping table and the scratch areas.
/// Everything here is allocated once at open.
pub(crate) struct TreeState {
    pub(crate) lay: PageLayout,
    pub(crate) compare: KeyComparator,
    pub(crate) mapping: MappingTable,

    /// Root-to-leaf-parent page ids of the in-flight insert; slot 0 is
    /// always the current root.
    pub(crate) active_path: [u32; MAX_LEVEL],
    pub(crate) path_len: usize,

    pub(crate) levels: usize,
    pub(crate) num_nodes: u32,

    /// Page id the current rewrite supersedes. Block recycling follows
    /// relocations through this so an in-flight copy-on-write lands its
    /// redirect on the page the parent actually references.
    pub(crate) rewrite_src: u32,

    pub(crate) temp_key: Vec<u8>,
    pub(crate) temp_record: Vec<u8>,
    pub(crate) probe_key: Vec<u8>,
    pub(crate) split_scratch: Vec<u8>,

    chain_writes: u32,
}

impl TreeState {
    fn new(lay: PageLayout, compare: KeyComparator, mapping_capacity: usize) -> Self {
        Self {
            lay,
            compare,
            mapping: MappingTable::new(mapping_capacity),
            active_path: [SENTINEL_PAGE; MAX_LEVEL],
            path_len: 0,
            levels: 1,
            num_nodes: 0,
            rewrite_src: SENTINEL_PAGE,
            temp_key: vec![0; lay.key_size],
            temp_record: vec![0; lay.record_size],
            probe_key: vec![0; lay.key_size],
            split_scratch: vec![0; lay.page_size],
            chain_writes: 0,
        }
    }

    /// Follow the remapping table and any on-disk `next_id` chain until
    /// the current location of a page is found.
    pub(crate) fn resolve<M: BlockMedium>(
        &self,
        store: &mut PageStore<M>,
        pnum: u32,
    ) -> Result<u32, MicroError> {
        let mut pnum = pnum;
        let mut hops = 0;
        loop {
            if let Some(next) = self.mapping.get(pnum) {
                pnum = next;
            } else {
                let next = {
                    let page = store.read(pnum)?;
                    header::next_id(page)
                };
                if next == SENTINEL_PAGE {
                    return Ok(pnum);
                }
                pnum = next;
            }
            hops += 1;
            if hops > MAX_CHAIN_HOPS {
                return Err(MicroError::new("next-page chain does not terminate"));
            }
        }
    }

    pub(crate) fn plausible_node(&self, page: &[u8]) -> bool {
        let lid = header::logical_id(page);
        if lid == 0 || lid == u32::MAX {
            return false;
        }
        let cap = if header::is_internal(page) {
            self.lay.internal_cap
        } else {
            self.lay.leaf_cap
        };
        header::record_count(page) <= cap
    }

    /// Like `resolve`, additionally reporting whether the resolution
    /// path passed through `watch`.
    fn resolve_watch<M: BlockMedium>(
        &self,
        store: &mut PageStore<M>,
        start: u32,
        watch: u32,
    ) -> Result<(u32, bool), MicroError> {
        let mut pnum = start;
        let mut touched = pnum == watch;
        let mut hops = 0;
        loop {
            if let Some(next) = self.mapping.get(pnum) {
                pnum = next;
            } else {
                let next = {
                    let page = store.read(pnum)?;
                    header::next_id(page)
                };
                if next == SENTINEL_PAGE {
                    return Ok((pnum, touched));
                }
                pnum = next;
            }
            if pnum == watch {
                touched = true;
            }
            hops += 1;
            if hops > MAX_CHAIN_HOPS {
                return Err(MicroError::new("next-page chain does not terminate"));
            }
        }
    }

    /// Classify a page for block recycling by searching the tree for the
    /// page's own minimum key.
    fn status_of<M: BlockMedium>(
        &mut self,
        store: &mut PageStore<M>,
        pnum: u32,
    ) -> Result<PageStatus, MicroError> {
        {
            let page = store.read(pnum)?;
            if !self.plausible_node(page) {
                return Ok(PageStatus::Garbage);
            }
            if header::record_count(page) == 0 {
                // only the root may be empty
                return Ok(if pnum == self.active_path[0] {
                    PageStatus::Live {
                        parent: SENTINEL_PAGE,
                        stored: pnum,
                    }
                } else {
                    PageStatus::Garbage
                });
            }
            let k = self.lay.key_size;
            self.probe_key
                .copy_from_slice(&page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + k]);
        }

        if pnum == self.active_path[0] {
            return Ok(PageStatus::Live {
                parent: SENTINEL_PAGE,
                stored: pnum,
            });
        }

        let mut node = self.active_path[0];
        for _ in 0..MAX_LEVEL {
            let stored = {
                let page = store.read(node)?;
                if !header::is_internal(page) {
                    return Ok(PageStatus::Garbage);
                }
                let view = InternalView::new(page, self.lay);
                view.child(view.search_child(&self.probe_key, self.compare))
            };
            let (resolved, touched) = self.resolve_watch(store, stored, pnum)?;
            if touched {
                return Ok(if resolved == pnum {
                    PageStatus::Live {
                        parent: node,
                        stored,
                    }
                } else {
                    PageStatus::Superseded {
                        parent: node,
                        stored,
                    }
                });
            }
            node = resolved;
        }
        Ok(PageStatus::Garbage)
    }

    /// Fix up a node that is about to land on a new physical page:
    /// absorb stale child ids, follow the move in the engine's own
    /// state, and leave a redirect keyed by the id the on-disk parent
    /// holds.
    fn relocate_node<M: BlockMedium>(
        &mut self,
        store: &mut PageStore<M>,
        prev: u32,
        stored: u32,
        curr: u32,
        buf: &mut [u8],
    ) -> MicroResult {
        if header::is_internal(buf) {
            self.update_pointers(buf);
        }
        if self.rewrite_src == prev {
            self.rewrite_src = curr;
        }

        let tracked = if self.path_len == 0 { 1 } else { self.path_len };
        let was_root = self.active_path[0] == prev;
        for slot in self.active_path[..tracked].iter_mut() {
            if *slot == prev {
                *slot = curr;
            }
        }
        if was_root {
            store.pin_root(curr);
            return Ok(());
        }

        header::set_prev_id(buf, stored);
        header::set_next_id(buf, SENTINEL_PAGE);
        self.fix_mappings(store, stored, curr)
    }

    /// Rewrite the pointers of `parent` so every entry of `moved` is
    /// referenced at its new location, then persist the parent itself.
    /// A parent whose pointers were already absorbed is left untouched.
    fn patch_parent<M: BlockMedium>(
        &mut self,
        store: &mut PageStore<M>,
        parent: u32,
        moved: &[MovedPage],
        scratch: &mut [u8],
    ) -> MicroResult {
        let pid = self.resolve(store, parent)?;
        {
            let page = store.read(pid)?;
            scratch.copy_from_slice(page);
        }
        if !header::is_internal(scratch) {
            return Err(MicroError::new(
                "parent of a relocated page is not an internal node",
            ));
        }
        let mut changed = false;
        {
            let mut view = InternalViewMut::new(scratch, self.lay);
            for m in moved {
                changed |= view.replace_child(m.old, m.new);
            }
        }
        for m in moved {
            self.mapping.remove(m.old);
        }
        changed |= self.update_pointers(scratch);
        if !changed {
            return Ok(());
        }

        if pid == self.active_path[0] {
            store.overwrite_from(scratch, pid)?;
            return Ok(());
        }
        let target = store.peek_write_id();
        self.relocate_node(store, pid, pid, target, scratch)?;
        let new = store.append_during_recycle(scratch)?;
        debug_assert_eq!(new, target);
        Ok(())
    }

    /// Swap any child id with a pending redirect for its current
    /// location and retire the consumed entries. Returns whether any
    /// pointer changed.
    pub(crate) fn update_pointers(&mut self, page: &mut [u8]) -> bool {
        let lay = self.lay;
        let n = header::record_count(page);
        let mut changed = false;
        for i in 0..=n {
            let stored = {
                let view = InternalView::new(page, lay);
                view.child(i)
            };
            let mut curr = stored;
            let mut hops = 0;
            while let Some(next) = self.mapping.get(curr) {
                curr = next;
                hops += 1;
                if hops > MAX_CHAIN_HOPS {
                    break;
                }
            }
            if curr != stored {
                {
                    let mut view = InternalViewMut::new(page, lay);
                    view.set_child(i, curr);
                }
                let mut x = stored;
                while x != curr {
                    match self.mapping.get(x) {
                        Some(next) => {
                            self.mapping.remove(x);
                            x = next;
                        }
                        None => break,
                    }
                }
                changed = true;
            }
        }
        changed
    }

    /// Record that `prev` is now served by `curr`. When the RAM table is
    /// full the redirect is programmed into the stale page's `next_id`
    /// field instead, where readers chase it on disk.
    pub(crate) fn fix_mappings<M: BlockMedium>(
        &mut self,
        store: &mut PageStore<M>,
        prev: u32,
        curr: u32,
    ) -> MicroResult {
        if prev == curr {
            return Ok(());
        }
        if self.mapping.insert(prev, curr) {
            return Ok(());
        }

        let mut tail = prev;
        let mut hops = 0;
        loop {
            let next = {
                let page = store.read(tail)?;
                header::next_id(page)
            };
            if next == SENTINEL_PAGE {
                break;
            }
            if next == curr {
                return Ok(());
            }
            tail = next;
            hops += 1;
            if hops > MAX_CHAIN_HOPS {
                return Err(MicroError::new("next-page chain does not terminate"));
            }
        }
        store.write_bytes(tail, OFF_NEXT_ID, &curr.to_ne_bytes())?;
        self.chain_writes += 1;
        debug!("chained stale page {} -> {}", tail, curr);
        Ok(())
    }

    /// Stamp the lineage header of a fresh copy-on-write page before it
    /// is appended. `rewrite_src` names the page it supersedes.
    pub(crate) fn stamp_lineage(&self, buf: &mut [u8]) {
        let src = self.rewrite_src;
        let hdr_prev = header::prev_id(buf);
        let eff = if hdr_prev != SENTINEL_PAGE && self.mapping.get(hdr_prev) == Some(src) {
            hdr_prev
        } else {
            src
        };
        header::set_prev_id(buf, eff);
        header::set_next_id(buf, SENTINEL_PAGE);
    }

    /// Install the redirect for a completed copy-on-write append. The
    /// stamped prev field decides whether an existing entry is updated
    /// in place or a new one is needed.
    pub(crate) fn settle_rewrite<M: BlockMedium>(
        &mut self,
        store: &mut PageStore<M>,
        stamped_prev: u32,
        new: u32,
    ) -> MicroResult {
        let src = self.rewrite_src;
        self.rewrite_src = SENTINEL_PAGE;
        let eff = if stamped_prev != SENTINEL_PAGE && self.mapping.get(stamped_prev) == Some(src)
        {
            stamped_prev
        } else {
            src
        };
        self.fix_mappings(store, eff, new)
    }

    pub(crate) fn get_into<M: BlockMedium>(
        &self,
        store: &mut PageStore<M>,
        key: &[u8],
        value_out: &mut [u8],
    ) -> Result<bool, MicroError> {
        let mut pid = self.active_path[0];
        for _ in 0..self.levels - 1 {
            let stored = {
                let page = store.read(pid)?;
                let view = InternalView::new(page, self.lay);
                view.child(view.search_child(key, self.compare))
            };
            pid = self.resolve(store, stored)?;
        }
        let page = store.read(pid)?;
        let leaf = LeafView::new(page, self.lay);
        match leaf.search(key, self.compare) {
            Some(i) => {
                value_out.copy_from_slice(leaf.value(i));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Retire one remapping entry by rewriting the parent of the stale
    /// page. Used by `close` to drain the RAM table.
    fn absorb_into_parent<M: BlockMedium>(
        &mut self,
        store: &mut PageStore<M>,
        entry_key: u32,
        stored: u32,
        parent: u32,
        scratch: &mut [u8],
    ) -> MicroResult {
        let curr = self.resolve(store, stored)?;
        let pid = self.resolve(store, parent)?;
        {
            let page = store.read(pid)?;
            scratch.copy_from_slice(page);
        }
        if !header::is_internal(scratch) {
            return Err(MicroError::new(
                "remapped page is not referenced by an internal node",
            ));
        }
        let mut changed = {
            let mut view = InternalViewMut::new(scratch, self.lay);
            view.replace_child(stored, curr)
        };
        self.mapping.remove(entry_key);
        self.mapping.remove(stored);
        changed |= self.update_pointers(scratch);
        if !changed {
            return Ok(());
        }

        if pid == self.active_path[0] {
            store.overwrite_from(scratch, pid)?;
            return Ok(());
        }
        self.rewrite_src = pid;
        self.stamp_lineage(scratch);
        let new = store.write_from(self, scratch)?;
        let stamped = header::prev_id(scratch);
        self.settle_rewrite(store, stamped, new)
    }
}

impl<M: BlockMedium> NodeHooks<M> for TreeState {
    fn page_status(
        &mut self,
        store: &mut PageStore<M>,
        pnum: u32,
    ) -> Result<PageStatus, MicroError> {
        self.status_of(store, pnum)
    }

    fn move_page(
        &mut self,
        store: &mut PageStore<M>,
        prev: u32,
        stored: u32,
        curr: u32,
        buf: &mut [u8],
    ) -> MicroResult {
        self.relocate_node(store, prev, stored, curr, buf)
    }

    fn current_page_of(
        &mut self,
        store: &mut PageStore<M>,
        pnum: u32,
    ) -> Result<u32, MicroError> {
        self.resolve(store, pnum)
    }

    fn rewrite_parent(
        &mut self,
        store: &mut PageStore<M>,
        parent: u32,
        moved: &[MovedPage],
        scratch: &mut [u8],
    ) -> MicroResult {
        self.patch_parent(store, parent, moved, scratch)
    }

    fn forget_pages(&mut self, first: u32, last: u32) {
        self.mapping.remove_range(first, last);
    }
}

/// An embedded B-tree of fixed-size records over a log-structured page
/// store. Single caller, no allocation in the core paths after open.
pub struct BTree<M: BlockMedium> {
    pub(crate) state: TreeState,
    pub(crate) store: PageStore<M>,
}

impl<M: BlockMedium> BTree<M> {
    /// Initialize an empty tree on a fresh medium.
    pub fn open(medium: M, config: &TreeConfig) -> Result<Self, MicroError> {
        if medium.page_size() != config.page_size {
            return Err(MicroError::new("medium and config disagree on page size"));
        }
        let lay = PageLayout::derive(config.page_size, config.key_size, config.data_size)?;
        let mut store = PageStore::open(medium, config.num_buffers, config.erase_block_pages)?;
        let mut state = TreeState::new(lay, config.compare, config.mapping_capacity);

        {
            let buf = store.slot_data_mut(0);
            for b in buf.iter_mut() {
                *b = 0;
            }
            header::init_node(buf, false, true);
        }
        let root = store.write_from_slot(&mut state, 0)?;
        state.active_path[0] = root;
        store.pin_root(root);
        state.levels = 1;
        state.num_nodes = 1;

        info!(
            "initialized b-tree: {} records per leaf, fan-out {}",
            lay.leaf_cap,
            lay.internal_cap + 1
        );
        Ok(Self { state, store })
    }

    /// Reattach to a previously initialized medium: the newest page
    /// carrying the root flag becomes the root, depth and node count are
    /// rebuilt by walking, and the remapping table starts empty (a clean
    /// `close` leaves nothing that would need it).
    pub fn recover(medium: M, config: &TreeConfig) -> Result<Self, MicroError> {
        if medium.page_size() != config.page_size {
            return Err(MicroError::new("medium and config disagree on page size"));
        }
        let lay = PageLayout::derive(config.page_size, config.key_size, config.data_size)?;
        let mut store = PageStore::attach(medium, config.num_buffers, config.erase_block_pages)?;
        let mut state = TreeState::new(lay, config.compare, config.mapping_capacity);

        let mut best: Option<(u32, u32)> = None;
        let mut max_lid = 0u32;
        for p in 0..store.pages() {
            let (lid, root_flag, plausible) = {
                let page = store.read(p)?;
                (
                    header::logical_id(page),
                    header::is_root(page),
                    state.plausible_node(page),
                )
            };
            if !plausible {
                continue;
            }
            if lid > max_lid {
                max_lid = lid;
            }
            if root_flag && best.map_or(true, |(_, best_lid)| lid > best_lid) {
                best = Some((p, lid));
            }
        }
        let (root, root_lid) =
            best.ok_or_else(|| MicroError::new("no root page found on the medium"))?;
        debug!("recovered root {} (logical id {})", root, root_lid);

        store.set_next_logical(max_lid + 1);
        state.active_path[0] = root;
        store.pin_root(root);

        let mut levels = 1;
        let mut pid = root;
        loop {
            let child = {
                let page = store.read(pid)?;
                if !header::is_internal(page) {
                    break;
                }
                InternalView::new(page, lay).child(0)
            };
            levels += 1;
            if levels > MAX_LEVEL {
                return Err(MicroError::new("recovered tree exceeds the depth limit"));
            }
            pid = state.resolve(&mut store, child)?;
        }
        state.levels = levels;

        store.recover_head(&mut state)?;

        let mut tree = Self { state, store };
        tree.state.num_nodes = tree.count_nodes()?;
        info!(
            "recovered b-tree: root {}, {} levels, {} nodes",
            root, levels, tree.state.num_nodes
        );
        Ok(tree)
    }

    /// Insert a record, or overwrite the value when the key exists.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> MicroResult {
        if key.len() != self.state.lay.key_size || value.len() != self.state.lay.data_size {
            return Err(MicroError::new("key or value size does not match the layout"));
        }
        let Self { state, store } = self;
        state.put(store, key, value)
    }

    /// Copy the value for `key` into `value_out`; false when absent.
    pub fn get(&mut self, key: &[u8], value_out: &mut [u8]) -> Result<bool, MicroError> {
        if key.len() != self.state.lay.key_size || value_out.len() != self.state.lay.data_size {
            return Err(MicroError::new("key or value size does not match the layout"));
        }
        let Self { state, store } = self;
        state.get_into(store, key, value_out)
    }

    /// Allocating convenience around `get`.
    pub fn get_value(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, MicroError> {
        let mut out = vec![0; self.state.lay.data_size];
        if self.get(key, &mut out)? {
            Ok(Some(out))
        } else {
            Ok(None)
        }
    }

    /// Drain the remapping table into the tree and release the medium.
    /// After a clean close every on-disk pointer resolves without RAM
    /// state, which is what makes `recover` exact.
    pub fn close(&mut self) -> MicroResult {
        self.drain_mappings()?;
        self.store.close()
    }

    fn drain_mappings(&mut self) -> MicroResult {
        let mut guard = 0;
        while let Some((prev, _)) = self.state.mapping.first() {
            guard += 1;
            if guard > 100_000 {
                return Err(MicroError::new("mapping drain did not converge"));
            }
            match self.state.status_of(&mut self.store, prev)? {
                PageStatus::Superseded { parent, stored } => {
                    let mut scratch = mem::take(&mut self.state.split_scratch);
                    let result = self.state.absorb_into_parent(
                        &mut self.store,
                        prev,
                        stored,
                        parent,
                        &mut scratch,
                    );
                    self.state.split_scratch = scratch;
                    result?;
                }
                _ => self.state.mapping.remove(prev),
            }
        }
        Ok(())
    }

    pub fn levels(&self) -> usize {
        self.state.levels
    }

    pub fn num_nodes(&self) -> u32 {
        self.state.num_nodes
    }

    pub fn mapping_len(&self) -> usize {
        self.state.mapping.len()
    }

    /// Number of redirects that had to be programmed into stale pages as
    /// on-disk `next_id` chains because the RAM table was full.
    pub fn chain_writes(&self) -> u32 {
        self.state.chain_writes
    }

    pub fn wrapped_memory(&self) -> bool {
        self.store.wrapped_memory()
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn print_stats(&self) {
        self.store.print_stats();
        info!(
            "tree stats: {} levels, {} nodes, {} mapped pages, {} chained",
            self.state.levels,
            self.state.num_nodes,
            self.state.mapping.len(),
            self.state.chain_writes
        );
    }

    fn count_nodes(&mut self) -> Result<u32, MicroError> {
        let Self { state, store } = self;
        if state.levels == 1 {
            return Ok(1);
        }
        let mut count = 1u32;
        let mut stack: Vec<(u32, usize)> = Vec::with_capacity(MAX_LEVEL);
        stack.push((state.active_path[0], 0));
        while !stack.is_empty() {
            let (pid, ci) = *stack.last().unwrap();
            let depth = stack.len();
            let (n_keys, stored) = {
                let page = store.read(pid)?;
                let view = InternalView::new(page, state.lay);
                let n = view.key_count();
                (n, if ci <= n { view.child(ci) } else { 0 })
            };
            if ci > n_keys {
                stack.pop();
                continue;
            }
            stack.last_mut().unwrap().1 += 1;
            let child = state.resolve(store, stored)?;
            count += 1;
            if depth < state.levels - 1 {
                stack.push((child, 0));
            }
        }
        Ok(count)
    }

    /// Structural walker: key order inside and across nodes, capacity
    /// bounds, terminating chains and a sane remapping table.
    pub fn check_integrity(&mut self, check_occupancy: bool) -> MicroResult {
        let targets: Vec<u32> = self.state.mapping.iter().map(|e| e.1).collect();
        for t in targets {
            let curr = self.state.resolve(&mut self.store, t)?;
            let page = self.store.read(curr)?;
            if !self.state.plausible_node(page) {
                return Err(MicroError::new("mapping entry leads to a non-node page"));
            }
        }

        struct Frame {
            pid: u32,
            next_child: usize,
            lower: Option<Vec<u8>>,
            upper: Option<Vec<u8>>,
        }

        let root = self.state.active_path[0];
        self.check_node_order(root, &None, &None, check_occupancy, true)?;
        if self.state.levels == 1 {
            return Ok(());
        }

        let mut stack = vec![Frame {
            pid: root,
            next_child: 0,
            lower: None,
            upper: None,
        }];
        while !stack.is_empty() {
            let (pid, ci) = {
                let top = stack.last().unwrap();
                (top.pid, top.next_child)
            };
            let (n_keys, stored) = {
                let page = self.store.read(pid)?;
                let view = InternalView::new(page, self.state.lay);
                let n = view.key_count();
                (n, if ci <= n { view.child(ci) } else { 0 })
            };
            if ci > n_keys {
                stack.pop();
                continue;
            }

            let (lower, upper) = {
                let top = stack.last().unwrap();
                let page = self.store.read(pid)?;
                let view = InternalView::new(page, self.state.lay);
                let lower = if ci == 0 {
                    top.lower.clone()
                } else {
                    Some(view.key(ci - 1).to_vec())
                };
                let upper = if ci == n_keys {
                    top.upper.clone()
                } else {
                    Some(view.key(ci).to_vec())
                };
                (lower, upper)
            };

            stack.last_mut().unwrap().next_child += 1;
            let child = self.state.resolve(&mut self.store, stored)?;
            self.check_node_order(child, &lower, &upper, check_occupancy, false)?;

            if stack.len() < self.state.levels - 1 {
                stack.push(Frame {
                    pid: child,
                    next_child: 0,
                    lower,
                    upper,
                });
            }
        }
        Ok(())
    }

    fn check_node_order(
        &mut self,
        pid: u32,
        lower: &Option<Vec<u8>>,
        upper: &Option<Vec<u8>>,
        check_occupancy: bool,
        is_root: bool,
    ) -> MicroResult {
        let state = &self.state;
        let page = self.store.read(pid)?;
        let internal = header::is_internal(page);
        let count = header::record_count(page);

        let cap = if internal {
            state.lay.internal_cap
        } else {
            state.lay.leaf_cap
        };
        if count > cap {
            return Err(MicroError::new(&format!(
                "node {} holds {} entries, cap {}",
                pid, count, cap
            )));
        }
        if check_occupancy && !is_root {
            let min = if internal {
                state.lay.internal_cap / 2 - 1
            } else {
                state.lay.leaf_cap / 2
            };
            if count < min {
                return Err(MicroError::new(&format!(
                    "node {} under-occupied: {} < {}",
                    pid, count, min
                )));
            }
        }

        for i in 0..count {
            let key = if internal {
                InternalView::new(page, state.lay).key(i)
            } else {
                LeafView::new(page, state.lay).key(i)
            };
            if i > 0 {
                let prev_key = if internal {
                    InternalView::new(page, state.lay).key(i - 1)
                } else {
                    LeafView::new(page, state.lay).key(i - 1)
                };
                if (state.compare)(prev_key, key) != Ordering::Less {
                    return Err(MicroError::new(&format!("node {} keys out of order", pid)));
                }
            }
            if let Some(lo) = lower {
                if (state.compare)(key, lo) == Ordering::Less {
                    return Err(MicroError::new(&format!(
                        "node {} key below its subtree bound",
                        pid
                    )));
                }
            }
            if let Some(hi) = upper {
                if (state.compare)(key, hi) != Ordering::Less {
                    return Err(MicroError::new(&format!(
                        "node {} key above its subtree bound",
                        pid
                    )));
                }
            }
        }
        Ok(())
    }
}
