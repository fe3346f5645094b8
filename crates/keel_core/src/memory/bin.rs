//! # Bin Allocator
//!
//! Segmented-fit allocator over one backing buffer. Free blocks are filed
//! into 256 size classes ("bins") addressed by a tiny floating-point encoding
//! of their size, and two bitmasks find the smallest non-empty bin that can
//! satisfy a request with a couple of bit scans.
//!
//! ## Size Classes
//!
//! ```text
//! size ──► [ exponent:5 | mantissa:3 ]  = bin index 0..=255
//!
//!            top bin (exponent)   leaf bin (mantissa)
//! used_bins_top: u32  ──bit t──►  used_bins[t]: u8  ──bit l──►  bin (t << 3 | l)
//! ```
//!
//! Sizes below 8 map to themselves; above that every power-of-two range is
//! split into 8 linear steps, so a bin over-approximates a size by at most
//! 12.5%. Allocation rounds the request **up** to a bin (any block in that
//! bin is big enough); free blocks are filed **down** (a block is never in a
//! bin promising more than it has).
//!
//! ## Blocks
//!
//! Every block, used or free, is a node in a doubly-linked list of physical
//! neighbours. Allocation splits the tail off a free block; freeing merges the
//! block with free neighbours at once, so two adjacent free blocks never
//! exist.
//!
//! ## Thread Safety
//!
//! This allocator is NOT thread-safe. All operations take `&mut self`.

use std::ptr::NonNull;

use crate::error::MemoryResult;
use crate::memory::allocator::Allocator;
use crate::memory::raw::{align_up, RawBuffer, BACKING_ALIGN};

/// Number of exponent groups.
pub const NUM_TOP_BINS: usize = 32;
/// Leaf bins per exponent group.
pub const BINS_PER_LEAF: usize = 8;
/// Total number of size classes.
pub const NUM_LEAF_BINS: usize = NUM_TOP_BINS * BINS_PER_LEAF;

const TOP_BINS_INDEX_SHIFT: u32 = 3;
const LEAF_BINS_INDEX_MASK: u32 = 0x7;

/// Node slots reserved by [`BinAllocator::new`].
pub const DEFAULT_MAX_ALLOCS: u32 = 4096;

const UNUSED: u32 = u32::MAX;

/// Exponent + 3-bit mantissa encoding of block sizes.
pub mod small_float {
    /// Bits of mantissa kept per size class.
    pub const MANTISSA_BITS: u32 = 3;
    /// Implicit leading one of the mantissa.
    pub const MANTISSA_VALUE: u32 = 1 << MANTISSA_BITS;
    /// Mask for the stored mantissa bits.
    pub const MANTISSA_MASK: u32 = MANTISSA_VALUE - 1;

    /// Smallest bin whose every member holds at least `size` bytes.
    #[must_use]
    pub const fn uint_to_float_round_up(size: u32) -> u32 {
        let mut exp = 0;
        let mut mantissa;

        if size < MANTISSA_VALUE {
            mantissa = size;
        } else {
            let highest_set_bit = 31 - size.leading_zeros();
            let mantissa_start_bit = highest_set_bit - MANTISSA_BITS;
            exp = mantissa_start_bit + 1;
            mantissa = (size >> mantissa_start_bit) & MANTISSA_MASK;

            let low_bits_mask = (1 << mantissa_start_bit) - 1;
            if size & low_bits_mask != 0 {
                mantissa += 1;
            }
        }

        // `+` rather than `|`: a mantissa overflow carries into the exponent.
        (exp << MANTISSA_BITS) + mantissa
    }

    /// Largest bin whose lower bound does not exceed `size`.
    #[must_use]
    pub const fn uint_to_float_round_down(size: u32) -> u32 {
        let mut exp = 0;
        let mantissa;

        if size < MANTISSA_VALUE {
            mantissa = size;
        } else {
            let highest_set_bit = 31 - size.leading_zeros();
            let mantissa_start_bit = highest_set_bit - MANTISSA_BITS;
            exp = mantissa_start_bit + 1;
            mantissa = (size >> mantissa_start_bit) & MANTISSA_MASK;
        }

        (exp << MANTISSA_BITS) | mantissa
    }

    /// Lower bound, in bytes, of a bin.
    #[must_use]
    pub const fn float_to_uint(float_value: u32) -> u32 {
        let exponent = float_value >> MANTISSA_BITS;
        let mantissa = float_value & MANTISSA_MASK;
        if exponent == 0 {
            mantissa
        } else {
            (mantissa | MANTISSA_VALUE) << (exponent - 1)
        }
    }
}

use small_float::{float_to_uint, uint_to_float_round_down, uint_to_float_round_up};

/// Index of the lowest set bit of `mask` at or above `start`.
#[inline]
fn find_lowest_set_bit_after(mask: u32, start: u32) -> Option<u32> {
    let mask_after = u32::MAX.checked_shl(start).unwrap_or(0);
    let bits = mask & mask_after;
    (bits != 0).then(|| bits.trailing_zeros())
}

/// Free-space summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageReport {
    /// Bytes not covered by any allocation.
    pub total_free_space: u32,
    /// Lower bound of the biggest free block's size class.
    pub largest_free_region: u32,
}

#[derive(Clone, Copy, Debug)]
struct Node {
    data_offset: u32,
    data_size: u32,
    bin_list_prev: u32,
    bin_list_next: u32,
    neighbor_prev: u32,
    neighbor_next: u32,
    used: bool,
}

impl Node {
    const EMPTY: Self = Self {
        data_offset: 0,
        data_size: 0,
        bin_list_prev: UNUSED,
        bin_list_next: UNUSED,
        neighbor_prev: UNUSED,
        neighbor_next: UNUSED,
        used: false,
    };
}

/// General-purpose allocator with size-class bins and eager coalescing.
///
/// # Example
///
/// ```rust
/// use keel_core::{Allocator, BinAllocator};
///
/// let mut arena = BinAllocator::new(1024).unwrap();
/// let a = arena.allocate::<u8>(100).unwrap();
/// let b = arena.allocate::<u8>(100).unwrap();
/// assert_eq!(arena.storage_report().total_free_space, 824);
///
/// arena.deallocate(a);
/// arena.deallocate(b);
/// assert_eq!(arena.storage_report().largest_free_region, 1024);
/// ```
pub struct BinAllocator {
    buffer: Option<RawBuffer>,
    size: u32,
    max_allocs: u32,
    free_storage: u32,

    used_bins_top: u32,
    used_bins: [u8; NUM_TOP_BINS],
    bin_indices: [u32; NUM_LEAF_BINS],

    nodes: Vec<Node>,
    /// Stack of unused node slots.
    free_nodes: Vec<u32>,
}

impl BinAllocator {
    /// Creates an allocator over `size_bytes` with [`DEFAULT_MAX_ALLOCS`] nodes.
    ///
    /// # Errors
    ///
    /// Fails if the backing buffer cannot be allocated.
    pub fn new(size_bytes: u32) -> MemoryResult<Self> {
        Self::with_max_allocs(size_bytes, DEFAULT_MAX_ALLOCS)
    }

    /// Creates an allocator over `size_bytes` able to track `max_allocs`
    /// blocks (used and free) at once.
    ///
    /// # Errors
    ///
    /// Fails if `size_bytes` is zero or the backing buffer cannot be allocated.
    pub fn with_max_allocs(size_bytes: u32, max_allocs: u32) -> MemoryResult<Self> {
        let mut allocator = Self::empty();
        allocator.initialize(size_bytes, max_allocs)?;
        Ok(allocator)
    }

    /// An allocator without backing storage. Every allocation fails until
    /// [`BinAllocator::initialize`] is called.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            buffer: None,
            size: 0,
            max_allocs: 0,
            free_storage: 0,
            used_bins_top: 0,
            used_bins: [0; NUM_TOP_BINS],
            bin_indices: [UNUSED; NUM_LEAF_BINS],
            nodes: Vec::new(),
            free_nodes: Vec::new(),
        }
    }

    /// (Re)creates the backing buffer and bookkeeping.
    ///
    /// Any previous buffer is released first.
    ///
    /// # Errors
    ///
    /// Fails if `size_bytes` is zero or the backing buffer cannot be allocated.
    pub fn initialize(&mut self, size_bytes: u32, max_allocs: u32) -> MemoryResult<()> {
        self.free();
        self.buffer = Some(RawBuffer::new(size_bytes as usize)?);
        self.size = size_bytes;
        self.max_allocs = max_allocs.max(1);
        self.reset_bookkeeping();

        tracing::debug!(size_bytes, max_allocs = self.max_allocs, "bin allocator initialized");
        Ok(())
    }

    /// Size of the managed region in bytes (0 once freed).
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.size
    }

    /// Number of nodes currently describing a block (used or free).
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_nodes.len()
    }

    /// Reserves `size` bytes and returns their offset in the buffer.
    ///
    /// `align` must be a power of two no greater than the backing alignment
    /// (16). Returns `None` and logs when no free block is large enough.
    pub fn allocate_offset(&mut self, size: u32, align: u32) -> Option<u32> {
        if self.buffer.is_none() {
            tracing::error!(size, "bin allocator used before initialize");
            return None;
        }
        if size == 0 || !align.is_power_of_two() || align as usize > BACKING_ALIGN {
            tracing::error!(size, align, "invalid bin allocation request");
            return None;
        }
        // One node may be needed for the split-off remainder.
        if self.free_nodes.is_empty() {
            tracing::error!(max_allocs = self.max_allocs, "bin allocator out of nodes");
            return None;
        }

        let size = align_up(size as usize, align as usize) as u32;
        let bin_index = match self.find_free_bin(size) {
            Some(bin) if self.head_fits(bin, size, align) => Some(bin),
            // The head block needs realigning and is too small for the
            // padding. Any block in the padded size class can absorb it.
            _ => size
                .checked_add(align - 1)
                .and_then(|padded| self.find_free_bin(padded)),
        };
        let Some(bin_index) = bin_index else {
            tracing::error!(
                size,
                free = self.free_storage,
                capacity = self.size,
                "bin allocator out of memory"
            );
            return None;
        };

        // Pop the head of the bin.
        let node_index = self.bin_indices[bin_index];
        let node = self.nodes[node_index as usize];
        let node_total_size = node.data_size;
        let padding = self.padding_for(node.data_offset, align);
        let used_size = padding + size;

        self.bin_indices[bin_index] = node.bin_list_next;
        if node.bin_list_next != UNUSED {
            self.nodes[node.bin_list_next as usize].bin_list_prev = UNUSED;
        }
        self.free_storage -= node_total_size;

        // Bin empty?
        if self.bin_indices[bin_index] == UNUSED {
            self.clear_bin_bit(bin_index);
        }

        {
            let node = &mut self.nodes[node_index as usize];
            node.data_size = used_size;
            node.used = true;
            node.bin_list_prev = UNUSED;
            node.bin_list_next = UNUSED;
        }

        // Push the unused tail back as a new free block right after this one.
        let remainder = node_total_size - used_size;
        if remainder > 0 {
            let new_node_index =
                self.insert_node_into_bin(remainder, node.data_offset + used_size);

            let neighbor_next = self.nodes[node_index as usize].neighbor_next;
            if neighbor_next != UNUSED {
                self.nodes[neighbor_next as usize].neighbor_prev = new_node_index;
            }
            self.nodes[new_node_index as usize].neighbor_prev = node_index;
            self.nodes[new_node_index as usize].neighbor_next = neighbor_next;
            self.nodes[node_index as usize].neighbor_next = new_node_index;
        }

        Some(node.data_offset + padding)
    }

    /// Releases the block containing `offset`.
    ///
    /// Foreign offsets and double frees are logged and ignored.
    pub fn deallocate_offset(&mut self, offset: u32) {
        match self.find_node_containing(offset) {
            Some(node_index) => self.free_node(node_index),
            None => tracing::error!(offset, "deallocate of offset not owned by bin allocator"),
        }
    }

    /// Free-space summary derived from the bin bitmasks.
    #[must_use]
    pub fn storage_report(&self) -> StorageReport {
        let mut largest_free_region = 0;
        if self.used_bins_top != 0 {
            let top_bin_index = 31 - self.used_bins_top.leading_zeros();
            let leaf_bin_index = 7 - self.used_bins[top_bin_index as usize].leading_zeros();
            largest_free_region =
                float_to_uint((top_bin_index << TOP_BINS_INDEX_SHIFT) | leaf_bin_index);
        }

        StorageReport {
            total_free_space: self.free_storage,
            largest_free_region,
        }
    }

    /// Percentage (0..=100) of the region covered by allocations.
    #[must_use]
    pub fn full_percentage(&self) -> f32 {
        if self.size == 0 {
            return 0.0;
        }
        let used = f64::from(self.size - self.free_storage);
        (used / f64::from(self.size) * 100.0) as f32
    }

    /// Sum of the sizes of all used blocks. Together with the free storage it
    /// always adds up to the capacity.
    #[must_use]
    pub fn used_storage(&self) -> u32 {
        self.nodes
            .iter()
            .filter(|node| node.used)
            .map(|node| node.data_size)
            .sum()
    }

    fn reset_bookkeeping(&mut self) {
        self.free_storage = 0;
        self.used_bins_top = 0;
        self.used_bins = [0; NUM_TOP_BINS];
        self.bin_indices = [UNUSED; NUM_LEAF_BINS];

        self.nodes.clear();
        self.nodes.resize(self.max_allocs as usize, Node::EMPTY);
        self.free_nodes.clear();
        // Lowest node index on top.
        self.free_nodes.extend((0..self.max_allocs).rev());

        // Start state: one free block spanning the whole region.
        if self.size > 0 {
            self.insert_node_into_bin(self.size, 0);
        }
    }

    /// Smallest non-empty bin whose blocks all hold at least `size` bytes.
    fn find_free_bin(&self, size: u32) -> Option<usize> {
        let min_bin_index = uint_to_float_round_up(size);
        let min_top_bin_index = min_bin_index >> TOP_BINS_INDEX_SHIFT;
        let min_leaf_bin_index = min_bin_index & LEAF_BINS_INDEX_MASK;

        // If the top bin exists, scan its leaf bins. This can fail.
        if (min_top_bin_index as usize) < NUM_TOP_BINS
            && self.used_bins_top & (1 << min_top_bin_index) != 0
        {
            if let Some(leaf) = find_lowest_set_bit_after(
                u32::from(self.used_bins[min_top_bin_index as usize]),
                min_leaf_bin_index,
            ) {
                return Some(((min_top_bin_index << TOP_BINS_INDEX_SHIFT) | leaf) as usize);
            }
        }

        // Otherwise scan the top bins, then take the smallest leaf.
        let top = find_lowest_set_bit_after(self.used_bins_top, min_top_bin_index + 1)?;
        let leaf = u32::from(self.used_bins[top as usize]).trailing_zeros();
        Some(((top << TOP_BINS_INDEX_SHIFT) | leaf) as usize)
    }

    fn head_fits(&self, bin_index: usize, size: u32, align: u32) -> bool {
        let node = &self.nodes[self.bin_indices[bin_index] as usize];
        self.padding_for(node.data_offset, align) + size <= node.data_size
    }

    #[inline]
    fn padding_for(&self, offset: u32, align: u32) -> u32 {
        let addr = self.block_addr(offset);
        (align_up(addr, align as usize) - addr) as u32
    }

    #[inline]
    fn block_addr(&self, offset: u32) -> usize {
        self.buffer
            .as_ref()
            .map_or(0, RawBuffer::base_addr)
            + offset as usize
    }

    fn clear_bin_bit(&mut self, bin_index: usize) {
        let top_bin_index = bin_index >> TOP_BINS_INDEX_SHIFT;
        let leaf_bin_index = bin_index & LEAF_BINS_INDEX_MASK as usize;
        self.used_bins[top_bin_index] &= !(1 << leaf_bin_index);

        // All leaf bins empty?
        if self.used_bins[top_bin_index] == 0 {
            self.used_bins_top &= !(1 << top_bin_index);
        }
    }

    fn insert_node_into_bin(&mut self, size: u32, data_offset: u32) -> u32 {
        // Round down to bin index to ensure that bin >= alloc
        let bin_index = uint_to_float_round_down(size) as usize;
        let top_bin_index = bin_index >> TOP_BINS_INDEX_SHIFT;
        let leaf_bin_index = bin_index & LEAF_BINS_INDEX_MASK as usize;

        // Bin was empty before?
        if self.bin_indices[bin_index] == UNUSED {
            self.used_bins[top_bin_index] |= 1 << leaf_bin_index;
            self.used_bins_top |= 1 << top_bin_index;
        }

        // Take a node slot and push it on the bin's list.
        let top_node_index = self.bin_indices[bin_index];
        let node_index = self
            .free_nodes
            .pop()
            .expect("callers reserve a node before splitting or merging");

        self.nodes[node_index as usize] = Node {
            data_offset,
            data_size: size,
            bin_list_next: top_node_index,
            ..Node::EMPTY
        };
        if top_node_index != UNUSED {
            self.nodes[top_node_index as usize].bin_list_prev = node_index;
        }
        self.bin_indices[bin_index] = node_index;

        self.free_storage += size;
        node_index
    }

    fn remove_node_from_bin(&mut self, node_index: u32) {
        let node = self.nodes[node_index as usize];

        if node.bin_list_prev == UNUSED {
            // Head of the bin: point the bin at the next node.
            let bin_index = uint_to_float_round_down(node.data_size) as usize;
            self.bin_indices[bin_index] = node.bin_list_next;
            if node.bin_list_next != UNUSED {
                self.nodes[node.bin_list_next as usize].bin_list_prev = UNUSED;
            }

            // Bin empty?
            if self.bin_indices[bin_index] == UNUSED {
                self.clear_bin_bit(bin_index);
            }
        } else {
            // Easy case: unlink from the middle of the list.
            self.nodes[node.bin_list_prev as usize].bin_list_next = node.bin_list_next;
            if node.bin_list_next != UNUSED {
                self.nodes[node.bin_list_next as usize].bin_list_prev = node.bin_list_prev;
            }
        }

        self.nodes[node_index as usize] = Node::EMPTY;
        self.free_nodes.push(node_index);
        self.free_storage -= node.data_size;
    }

    /// Linear scan over every node. O(max_allocs).
    fn find_node_containing(&self, offset: u32) -> Option<u32> {
        // Recycled slots are reset to `Node::EMPTY`, whose size is 0.
        self.nodes
            .iter()
            .position(|node| {
                node.data_size > 0
                    && offset >= node.data_offset
                    && offset - node.data_offset < node.data_size
            })
            .map(|index| index as u32)
    }

    fn free_node(&mut self, node_index: u32) {
        let node = self.nodes[node_index as usize];
        if !node.used {
            tracing::error!(offset = node.data_offset, "double free in bin allocator");
            return;
        }

        let mut offset = node.data_offset;
        let mut size = node.data_size;
        let mut neighbor_prev = node.neighbor_prev;
        let mut neighbor_next = node.neighbor_next;

        if neighbor_prev != UNUSED && !self.nodes[neighbor_prev as usize].used {
            // Previous (contiguous) free node: take its offset and size.
            let prev = self.nodes[neighbor_prev as usize];
            offset = prev.data_offset;
            size += prev.data_size;

            self.remove_node_from_bin(neighbor_prev);
            neighbor_prev = prev.neighbor_prev;
        }

        if neighbor_next != UNUSED && !self.nodes[neighbor_next as usize].used {
            // Next (contiguous) free node: absorb its size.
            let next = self.nodes[neighbor_next as usize];
            size += next.data_size;

            self.remove_node_from_bin(neighbor_next);
            neighbor_next = next.neighbor_next;
        }

        // Recycle this node's slot, then file the merged block.
        self.nodes[node_index as usize] = Node::EMPTY;
        self.free_nodes.push(node_index);

        let combined_node_index = self.insert_node_into_bin(size, offset);

        if neighbor_next != UNUSED {
            self.nodes[combined_node_index as usize].neighbor_next = neighbor_next;
            self.nodes[neighbor_next as usize].neighbor_prev = combined_node_index;
        }
        if neighbor_prev != UNUSED {
            self.nodes[combined_node_index as usize].neighbor_prev = neighbor_prev;
            self.nodes[neighbor_prev as usize].neighbor_next = combined_node_index;
        }
    }
}

impl Allocator for BinAllocator {
    fn allocate<T>(&mut self, size: usize) -> Option<NonNull<T>> {
        let Ok(size) = u32::try_from(size) else {
            tracing::error!(size, "bin allocation larger than 4 GiB");
            return None;
        };
        let offset = self.allocate_offset(size, std::mem::align_of::<T>() as u32)?;
        self.buffer
            .as_ref()
            .map(|buffer| buffer.ptr_at(offset as usize).cast())
    }

    fn deallocate<T>(&mut self, ptr: NonNull<T>) {
        let Some(offset) = self
            .buffer
            .as_ref()
            .and_then(|buffer| buffer.offset_of(ptr.as_ptr().cast()))
        else {
            tracing::error!(ptr = ?ptr, "deallocate of pointer not owned by bin allocator");
            return;
        };
        self.deallocate_offset(offset as u32);
    }

    fn invalidate(&mut self) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.zero();
        }
        self.reset_bookkeeping();
    }

    fn free(&mut self) {
        self.buffer = None;
        self.size = 0;
        self.max_allocs = 0;
        self.reset_bookkeeping();
    }
}

impl std::fmt::Debug for BinAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinAllocator")
            .field("capacity", &self.size)
            .field("free_storage", &self.free_storage)
            .field("nodes", &self.node_count())
            .finish()
    }
}
