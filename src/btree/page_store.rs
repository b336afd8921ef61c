use std::mem;

use log::{debug, info};

use crate::{
    btree::consts::{EMPTY_SLOT, SENTINEL_PAGE},
    btree::page::header,
    error::MicroError,
    medium::BlockMedium,
    types::MicroResult,
};

/// Verdict on a page sitting in a block about to be erased. `stored` is
/// the child id the parent actually holds on disk, which may be an older
/// id that only resolves to the page through the remapping table or an
/// on-disk chain.
#[derive(Clone, Copy, Debug)]
pub enum PageStatus {
    /// Not reachable from the root; safe to drop.
    Garbage,

    /// Reachable at its current location. Must be relocated and its
    /// parent rewritten. `parent` is SENTINEL_PAGE when the page is the
    /// root itself.
    Live { parent: u32, stored: u32 },

    /// A newer copy exists; only the parent needs a rewrite so the stale
    /// reference is retired before the erase.
    Superseded { parent: u32, stored: u32 },
}

/// A redirect produced during one recycling pass: the parent's stored
/// child id `old` must become `new`. `page` is the physical page that
/// was classified.
#[derive(Clone, Copy, Debug)]
pub struct MovedPage {
    pub old: u32,
    pub new: u32,
    pub parent: u32,
    pub page: u32,
}

/// Node-semantic capabilities the tree engine lends to the store so block
/// recycling can tell live pages from garbage and keep parents current.
/// The store itself stays ignorant of what a node is.
pub trait NodeHooks<M: BlockMedium> {
    fn page_status(
        &mut self,
        store: &mut PageStore<M>,
        pnum: u32,
    ) -> Result<PageStatus, MicroError>;

    /// The page at `prev` is about to land on `curr`; fix up `buf` (child
    /// pointers, lineage header) and any engine state that referenced
    /// `prev`, and leave a redirect keyed by `stored`, the id the parent
    /// holds. Must not touch buffer slot 0.
    fn move_page(
        &mut self,
        store: &mut PageStore<M>,
        prev: u32,
        stored: u32,
        curr: u32,
        buf: &mut [u8],
    ) -> MicroResult;

    /// Resolve a stale page id to its current location.
    fn current_page_of(
        &mut self,
        store: &mut PageStore<M>,
        pnum: u32,
    ) -> Result<u32, MicroError>;

    /// Rewrite `parent` so its child pointers reflect `moved`, retiring
    /// the matching remapping entries. `scratch` is a page-sized work
    /// area owned by the store.
    fn rewrite_parent(
        &mut self,
        store: &mut PageStore<M>,
        parent: u32,
        moved: &[MovedPage],
        scratch: &mut [u8],
    ) -> MicroResult;

    /// Drop every remapping entry touching the page range about to be
    /// erased; those ids are about to be reused.
    fn forget_pages(&mut self, first: u32, last: u32);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
    pub overwrites: u64,
    pub hits: u64,
}

struct BufferSlot {
    pnum: u32,
    data: Vec<u8>,
}

/// Log-structured page store over a block medium: a tiny buffer pool with
/// a deterministic replacement policy, an append-only write head, and an
/// erase-block ring that relocates live pages once the medium has
/// wrapped.
pub struct PageStore<M: BlockMedium> {
    medium: M,
    page_size: usize,
    num_pages: u32,
    block_pages: u32,

    buffers: Vec<BufferSlot>,
    last_hit: usize,
    rr_next: usize,
    pinned_root: u32,

    next_write_id: u32,
    block_end_page: u32,
    erased_start_page: u32,
    wrapped_memory: bool,
    next_logical_id: u32,

    relocation_buf: Vec<u8>,
    plan: Vec<(u32, PageStatus)>,
    moved: Vec<MovedPage>,

    stats: StoreStats,
}

impl<M: BlockMedium> PageStore<M> {
    fn build(medium: M, num_buffers: usize, block_pages: u32) -> Result<Self, MicroError> {
        let page_size = medium.page_size();
        let num_pages = medium.pages();

        if num_buffers < 2 {
            return Err(MicroError::new("need at least two page buffers"));
        }
        if block_pages == 0 || num_pages % block_pages != 0 {
            return Err(MicroError::new(
                "medium size must be a whole number of erase blocks",
            ));
        }
        if num_pages < 2 * block_pages {
            return Err(MicroError::new("medium smaller than two erase blocks"));
        }

        let buffers = (0..num_buffers)
            .map(|_| BufferSlot {
                pnum: EMPTY_SLOT,
                data: vec![0; page_size],
            })
            .collect();

        Ok(Self {
            medium,
            page_size,
            num_pages,
            block_pages,
            buffers,
            last_hit: 0,
            rr_next: 2,
            pinned_root: EMPTY_SLOT,
            next_write_id: 0,
            block_end_page: 0,
            erased_start_page: 0,
            wrapped_memory: false,
            next_logical_id: 1,
            relocation_buf: vec![0; page_size],
            plan: Vec::with_capacity(block_pages as usize),
            moved: Vec::with_capacity(block_pages as usize),
            stats: StoreStats::default(),
        })
    }

    /// Fresh store: erase the first two blocks and park the write head at
    /// page 0, with the second block pre-erased ahead of the head.
    pub fn open(medium: M, num_buffers: usize, block_pages: u32) -> Result<Self, MicroError> {
        let mut store = Self::build(medium, num_buffers, block_pages)?;
        store.medium.erase_pages(0, 2 * block_pages - 1)?;
        store.next_write_id = 0;
        store.block_end_page = block_pages - 1;
        store.erased_start_page = block_pages;
        Ok(store)
    }

    /// Reattach to a previously written medium. The head is parked by
    /// `recover_head` once the engine is able to classify pages.
    pub fn attach(medium: M, num_buffers: usize, block_pages: u32) -> Result<Self, MicroError> {
        Self::build(medium, num_buffers, block_pages)
    }

    pub fn pages(&self) -> u32 {
        self.num_pages
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn wrapped_memory(&self) -> bool {
        self.wrapped_memory
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    pub fn set_next_logical(&mut self, v: u32) {
        self.next_logical_id = v;
    }

    /// Pin hint for the replacement policy: the root page gets buffer
    /// slot 1 whenever three or more buffers exist.
    pub fn pin_root(&mut self, pnum: u32) {
        self.pinned_root = pnum;
    }

    pub fn print_stats(&self) {
        info!(
            "page store stats: reads {}, writes {}, overwrites {}, buffer hits {}",
            self.stats.reads, self.stats.writes, self.stats.overwrites, self.stats.hits
        );
    }

    pub fn close(&mut self) -> MicroResult {
        self.medium.sync()?;
        self.print_stats();
        Ok(())
    }

    // ---- buffered reads ----

    /// Read through the buffer pool. Page 0 marks an empty slot, so it is
    /// re-read from the medium every time.
    pub fn read(&mut self, pnum: u32) -> Result<&[u8], MicroError> {
        self.stats.reads += 1;

        let mut found = None;
        if pnum != EMPTY_SLOT {
            for (i, b) in self.buffers.iter().enumerate().skip(1) {
                if b.pnum == pnum {
                    found = Some(i);
                    break;
                }
            }
        }
        if let Some(slot) = found {
            self.stats.hits += 1;
            self.last_hit = slot;
            return Ok(&self.buffers[slot].data);
        }

        let slot = self.choose_slot(pnum);
        self.medium.read_page(pnum, &mut self.buffers[slot].data)?;
        self.buffers[slot].pnum = pnum;
        Ok(&self.buffers[slot].data)
    }

    /// Force-load a page into a specific slot (the engine pulls nodes it
    /// intends to modify into slot 0 this way).
    pub fn read_into(&mut self, pnum: u32, slot: usize) -> Result<&mut [u8], MicroError> {
        self.stats.reads += 1;
        if self.buffers[slot].pnum == pnum && pnum != EMPTY_SLOT {
            self.stats.hits += 1;
        } else {
            self.medium.read_page(pnum, &mut self.buffers[slot].data)?;
            self.buffers[slot].pnum = pnum;
        }
        Ok(&mut self.buffers[slot].data)
    }

    pub fn slot_data(&self, slot: usize) -> &[u8] {
        &self.buffers[slot].data
    }

    pub fn slot_data_mut(&mut self, slot: usize) -> &mut [u8] {
        &mut self.buffers[slot].data
    }

    fn choose_slot(&mut self, pnum: u32) -> usize {
        let b = self.buffers.len();
        if b >= 3 && pnum == self.pinned_root && pnum != EMPTY_SLOT {
            return 1;
        }
        if b == 2 {
            return 1;
        }
        if b == 3 {
            return 2;
        }

        // prefer an empty slot
        for i in 2..b {
            if self.buffers[i].pnum == EMPTY_SLOT {
                return i;
            }
        }

        // round-robin over the general slots, sparing the last hit
        for _ in 0..b {
            let slot = self.rr_next;
            self.rr_next += 1;
            if self.rr_next >= b {
                self.rr_next = 2;
            }
            if slot >= 2 && slot != self.last_hit {
                return slot;
            }
        }
        2
    }

    fn invalidate_page(&mut self, pnum: u32) {
        for b in &mut self.buffers {
            if b.pnum == pnum {
                b.pnum = EMPTY_SLOT;
            }
        }
    }

    fn copy_slot(&mut self, src: usize, dst: usize) {
        if src == dst {
            return;
        }
        let (a, b) = if src < dst {
            let (lo, hi) = self.buffers.split_at_mut(dst);
            (&lo[src].data, &mut hi[0].data)
        } else {
            let (lo, hi) = self.buffers.split_at_mut(src);
            (&hi[0].data, &mut lo[dst].data)
        };
        b.copy_from_slice(a);
    }

    // ---- writes ----

    pub fn peek_write_id(&self) -> u32 {
        self.next_write_id
    }

    /// Append the contents of a buffer slot at the write head, stamping a
    /// fresh logical id. May recycle an erase block first.
    pub fn write_from_slot(
        &mut self,
        hooks: &mut dyn NodeHooks<M>,
        slot: usize,
    ) -> Result<u32, MicroError> {
        self.ensure_space(hooks)?;
        let pnum = {
            let lid = self.next_logical_id;
            let data = &mut self.buffers[slot].data;
            header::set_logical_id(data, lid);
            let pnum = self.next_write_id;
            self.medium.write_page(pnum, data)?;
            pnum
        };
        self.buffers[slot].pnum = pnum;
        self.finish_append();
        Ok(pnum)
    }

    /// Append from an engine-owned buffer.
    pub fn write_from(
        &mut self,
        hooks: &mut dyn NodeHooks<M>,
        buf: &mut [u8],
    ) -> Result<u32, MicroError> {
        self.ensure_space(hooks)?;
        self.append_raw(buf)
    }

    /// Append without the erase-block check. Only valid while space is
    /// known to exist: internally, and from hooks during a recycling
    /// pass (a reclaimed block always has room for its own live pages
    /// plus their parents).
    pub fn append_during_recycle(&mut self, buf: &mut [u8]) -> Result<u32, MicroError> {
        self.append_raw(buf)
    }

    fn append_raw(&mut self, buf: &mut [u8]) -> Result<u32, MicroError> {
        let pnum = self.next_write_id;
        if pnum > self.block_end_page {
            return Err(MicroError::new("write head overran the open erase block"));
        }
        header::set_logical_id(buf, self.next_logical_id);
        self.medium.write_page(pnum, buf)?;
        self.finish_append();
        Ok(pnum)
    }

    fn finish_append(&mut self) {
        self.next_write_id += 1;
        self.next_logical_id += 1;
        self.stats.writes += 1;
    }

    /// Rewrite a page at its existing location, refreshing its logical id
    /// and every buffer slot that caches it.
    pub fn overwrite_slot(&mut self, slot: usize, pnum: u32) -> Result<u32, MicroError> {
        let lid = self.next_logical_id;
        self.next_logical_id += 1;
        {
            let data = &mut self.buffers[slot].data;
            header::set_logical_id(data, lid);
        }
        self.medium.write_page(pnum, &self.buffers[slot].data)?;
        self.buffers[slot].pnum = pnum;
        for i in 0..self.buffers.len() {
            if i != slot && self.buffers[i].pnum == pnum {
                self.copy_slot(slot, i);
            }
        }
        self.stats.overwrites += 1;
        Ok(pnum)
    }

    pub fn overwrite_from(&mut self, buf: &mut [u8], pnum: u32) -> Result<u32, MicroError> {
        let lid = self.next_logical_id;
        self.next_logical_id += 1;
        header::set_logical_id(buf, lid);
        self.medium.write_page(pnum, buf)?;
        for b in &mut self.buffers {
            if b.pnum == pnum {
                b.data.copy_from_slice(buf);
            }
        }
        self.stats.overwrites += 1;
        Ok(pnum)
    }

    /// Patch a few bytes of an already written page, e.g. programming a
    /// `next_id` chain link into a stale page.
    pub fn write_bytes(&mut self, pnum: u32, offset: usize, bytes: &[u8]) -> MicroResult {
        self.medium.patch_bytes(pnum, offset, bytes)?;
        for b in &mut self.buffers {
            if b.pnum == pnum {
                b.data[offset..offset + bytes.len()].copy_from_slice(bytes);
            }
        }
        Ok(())
    }

    pub fn erase_pages(&mut self, first: u32, last: u32) -> MicroResult {
        self.medium.erase_pages(first, last)?;
        for p in first..=last {
            self.invalidate_page(p);
        }
        Ok(())
    }

    // ---- erase-block ring ----

    fn ensure_space(&mut self, hooks: &mut dyn NodeHooks<M>) -> MicroResult {
        while self.next_write_id > self.block_end_page {
            self.advance_block(hooks)?;
        }
        Ok(())
    }

    /// The open block is full: move the head into the block erased ahead
    /// of time, then erase the next block ahead of that, relocating any
    /// live pages out of it once the medium has wrapped.
    fn advance_block(&mut self, hooks: &mut dyn NodeHooks<M>) -> MicroResult {
        self.next_write_id = self.erased_start_page;
        self.block_end_page = self.erased_start_page + self.block_pages - 1;
        debug!(
            "write head moved to block {}..{}",
            self.next_write_id, self.block_end_page
        );
        self.prepare_next_erased(hooks)
    }

    fn prepare_next_erased(&mut self, hooks: &mut dyn NodeHooks<M>) -> MicroResult {
        let current_start = self.block_end_page + 1 - self.block_pages;
        let mut candidate = self.block_end_page + 1;
        let mut scanned = 0u32;

        loop {
            if candidate + self.block_pages > self.num_pages {
                candidate = 0;
                self.wrapped_memory = true;
            }
            if candidate == current_start {
                candidate += self.block_pages;
                scanned += self.block_pages;
                continue;
            }

            let first = candidate;
            let last = candidate + self.block_pages - 1;
            let reclaimed = if self.wrapped_memory {
                self.reclaim_block(hooks, first, last)?
            } else {
                self.medium.erase_pages(first, last)?;
                true
            };
            if reclaimed {
                self.erased_start_page = first;
                return Ok(());
            }

            candidate = last + 1;
            scanned += self.block_pages;
            if scanned >= self.num_pages {
                return Err(MicroError::new("no reclaimable erase block on the medium"));
            }
        }
    }

    /// Classify every page in the block; skip the block when over half of
    /// it is live, otherwise relocate the live pages, rewrite their
    /// parents and erase. Returns false for a skipped block.
    fn reclaim_block(
        &mut self,
        hooks: &mut dyn NodeHooks<M>,
        first: u32,
        last: u32,
    ) -> Result<bool, MicroError> {
        let mut plan = mem::take(&mut self.plan);
        plan.clear();
        let mut live = 0u32;
        for p in first..=last {
            let st = hooks.page_status(self, p)?;
            if let PageStatus::Live { .. } = st {
                live += 1;
            }
            plan.push((p, st));
        }

        // every relocation and parent rewrite appends at the head, so the
        // open block must have room for all of them
        let mut appends = live;
        for (i, &(_, st)) in plan.iter().enumerate() {
            let parent = match st {
                PageStatus::Live { parent, .. } | PageStatus::Superseded { parent, .. } => parent,
                PageStatus::Garbage => continue,
            };
            if parent == SENTINEL_PAGE {
                continue;
            }
            let repeated = plan[..i].iter().any(|&(_, earlier)| match earlier {
                PageStatus::Live { parent: q, .. } | PageStatus::Superseded { parent: q, .. } => {
                    q == parent
                }
                PageStatus::Garbage => false,
            });
            if !repeated {
                appends += 1;
            }
        }
        let room = self.block_end_page + 1 - self.next_write_id;

        if live * 2 > self.block_pages || appends > room {
            debug!(
                "block {}..{} skipped, {} live pages, {} appends for {} free",
                first, last, live, appends, room
            );
            self.plan = plan;
            return Ok(false);
        }

        let mut moved = mem::take(&mut self.moved);
        moved.clear();
        let mut buf = mem::take(&mut self.relocation_buf);

        let result = self.relocate_and_erase(hooks, &plan, &mut moved, &mut buf, first, last);

        self.plan = plan;
        self.moved = moved;
        self.relocation_buf = buf;
        result?;
        Ok(true)
    }

    fn relocate_and_erase(
        &mut self,
        hooks: &mut dyn NodeHooks<M>,
        plan: &[(u32, PageStatus)],
        moved: &mut Vec<MovedPage>,
        buf: &mut [u8],
        first: u32,
        last: u32,
    ) -> MicroResult {
        for &(p, st) in plan {
            match st {
                PageStatus::Garbage => {}
                PageStatus::Live { parent, stored } => {
                    self.stats.reads += 1;
                    self.medium.read_page(p, buf)?;
                    debug!(
                        "relocating page {} (header {})",
                        p,
                        hex::encode(&buf[..16])
                    );
                    let target = self.next_write_id;
                    hooks.move_page(self, p, stored, target, buf)?;
                    header::set_next_id(buf, SENTINEL_PAGE);
                    let new = self.append_raw(buf)?;
                    self.invalidate_page(p);
                    moved.push(MovedPage {
                        old: stored,
                        new,
                        parent,
                        page: p,
                    });
                }
                PageStatus::Superseded { parent, stored } => {
                    let curr = hooks.current_page_of(self, stored)?;
                    if curr >= first && curr <= last {
                        // the live copy sits in this very block; its own
                        // relocation covers the redirect
                        continue;
                    }
                    moved.push(MovedPage {
                        old: stored,
                        new: curr,
                        parent,
                        page: p,
                    });
                }
            }
        }

        // one rewrite per distinct parent retires every stale reference
        // into the range before it is erased
        for i in 0..moved.len() {
            let parent = moved[i].parent;
            if parent == SENTINEL_PAGE {
                continue;
            }
            if moved[..i].iter().any(|m| m.parent == parent) {
                continue;
            }
            // the parent itself may have been relocated by this pass
            let parent_now = moved
                .iter()
                .find(|m| m.page == parent)
                .map(|m| m.new)
                .unwrap_or(parent);
            hooks.rewrite_parent(self, parent_now, moved, buf)?;
        }

        hooks.forget_pages(first, last);
        self.medium.erase_pages(first, last)?;
        for p in first..=last {
            self.invalidate_page(p);
        }
        debug!("recycled block {}..{}", first, last);
        Ok(())
    }

    /// Park the write head after a recovery scan: claim a block that
    /// holds nothing live, then pre-erase the block after it through the
    /// normal wrapped-mode path.
    pub fn recover_head(&mut self, hooks: &mut dyn NodeHooks<M>) -> MicroResult {
        self.wrapped_memory = true;

        let blocks = self.num_pages / self.block_pages;
        let mut start = None;
        'blocks: for b in 0..blocks {
            let first = b * self.block_pages;
            for p in first..first + self.block_pages {
                if let PageStatus::Live { .. } = hooks.page_status(self, p)? {
                    continue 'blocks;
                }
            }
            start = Some(first);
            break;
        }
        let first = start
            .ok_or_else(|| MicroError::new("no free erase block left for recovery"))?;

        self.erase_pages(first, first + self.block_pages - 1)?;
        self.next_write_id = first;
        self.block_end_page = first + self.block_pages - 1;
        self.prepare_next_erased(hooks)
    }
}
