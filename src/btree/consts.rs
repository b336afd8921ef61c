/// Size of a child pointer / page id on storage.
pub const INDEX_SIZE: usize = 4;

/// Fixed page header: logical id, prev id, next id, count+flags, padding.
pub const PAGE_HEADER_SIZE: usize = 16;

pub const OFF_LOGICAL_ID: usize = 0;
pub const OFF_PREV_ID: usize = 4;
pub const OFF_NEXT_ID: usize = 8;
pub const OFF_COUNT_FLAGS: usize = 12;

/// Absent page reference. All-ones so the field can still be programmed
/// in place on an erased-to-ones medium.
pub const SENTINEL_PAGE: u32 = u32::MAX;

/// Page number 0 marks an empty buffer slot; a cached page 0 never
/// produces a buffer hit.
pub const EMPTY_SLOT: u32 = 0;

/// Hard bound on tree depth; the active path and iterator stacks are
/// fixed arrays of this length.
pub const MAX_LEVEL: usize = 8;

/// Upper bound on redirect hops (RAM entries plus on-disk `next_id`
/// links) before a chain is declared corrupt.
pub const MAX_CHAIN_HOPS: usize = 512;

pub const COUNT_MASK: u16 = 0x3FFF;
pub const FLAG_INTERNAL: u16 = 0x4000;
pub const FLAG_ROOT: u16 = 0x8000;

pub const DEFAULT_PAGE_SIZE: usize = 512;
