//! # Resource Handles
//!
//! Handles are lightweight references consisting of:
//! - An index into a pool's slot array
//! - A generation counter that detects stale references after slot reuse
//!
//! A handle never owns the resource it names. Generation `0` is reserved for
//! "never issued", so a default handle is always invalid.
//!
//! Generations are 16 bits wide. A slot reused 65 535 times wraps back to a
//! generation an old handle may still carry; pools do not guard against that.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque, generation-checked reference to a pooled object.
///
/// The type parameter only tags which pool a handle belongs to, so a
/// `Handle<Texture>` cannot be passed where a `Handle<Buffer>` is expected.
///
/// Packed layout (`u32`):
/// - Upper 16 bits: slot index
/// - Lower 16 bits: generation
pub struct Handle<T> {
    index: u16,
    generation: u16,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// The invalid handle. Equal to `Handle::default()`.
    pub const INVALID: Self = Self::new(0, 0);

    /// Creates a handle from its parts.
    ///
    /// # Arguments
    ///
    /// * `index` - Slot index inside the owning pool
    /// * `generation` - Generation of that slot when the handle was issued
    #[inline]
    #[must_use]
    pub const fn new(index: u16, generation: u16) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Returns the slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u16 {
        self.index
    }

    /// Returns the generation the handle was issued with.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u16 {
        self.generation
    }

    /// Checks whether the handle was ever issued by a pool.
    ///
    /// A valid handle can still be stale; only the pool can tell.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.generation != 0
    }

    /// Packs the handle into `index << 16 | generation`.
    #[inline]
    #[must_use]
    pub const fn pack(self) -> u32 {
        ((self.index as u32) << 16) | self.generation as u32
    }

    /// Rebuilds a handle from [`Handle::pack`] output.
    #[inline]
    #[must_use]
    pub const fn unpack(packed: u32) -> Self {
        Self::new((packed >> 16) as u16, packed as u16)
    }

    /// Key for hash maps keyed by raw integers.
    #[inline]
    #[must_use]
    pub const fn hash_key(self) -> u32 {
        self.pack()
    }

    /// Re-tags the handle for another pool type, keeping index and generation.
    #[inline]
    #[must_use]
    pub const fn cast<U>(self) -> Handle<U> {
        Handle::new(self.index, self.generation)
    }
}

// Manual impls: derives would demand `T: Clone`, `T: Eq`, ... on the marker.
impl<T> Clone for Handle<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.pack().cmp(&other.pack())
    }
}

impl<T> Hash for Handle<T> {
    #[inline]
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.hash_key().hash(state);
    }
}

impl<T> Default for Handle<T> {
    #[inline]
    fn default() -> Self {
        Self::INVALID
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> Serialize for Handle<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.pack())
    }
}

impl<'de, T> Deserialize<'de> for Handle<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self::unpack)
    }
}

/// Plain-old-data form of a packed handle, for handle tables written to disk
/// or passed across a module boundary as raw bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct PackedHandle(pub u32);

impl<T> From<Handle<T>> for PackedHandle {
    #[inline]
    fn from(handle: Handle<T>) -> Self {
        Self(handle.pack())
    }
}

impl<T> From<PackedHandle> for Handle<T> {
    #[inline]
    fn from(packed: PackedHandle) -> Self {
        Self::unpack(packed.0)
    }
}

/// Encodes a handle table as native-endian bytes.
#[must_use]
pub fn encode_handles<T>(handles: &[Handle<T>]) -> Vec<u8> {
    let packed: Vec<PackedHandle> = handles.iter().copied().map(PackedHandle::from).collect();
    bytemuck::cast_slice(&packed).to_vec()
}

/// Decodes a table written by [`encode_handles`].
///
/// Trailing bytes that do not form a whole handle are ignored.
#[must_use]
pub fn decode_handles<T>(bytes: &[u8]) -> Vec<Handle<T>> {
    bytes
        .chunks_exact(std::mem::size_of::<PackedHandle>())
        .map(|chunk| bytemuck::pod_read_unaligned::<PackedHandle>(chunk).into())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    struct Texture;
    struct Buffer;

    #[test]
    fn test_default_is_invalid() {
        let handle: Handle<Texture> = Handle::default();
        assert!(!handle.is_valid());
        assert_eq!(handle, Handle::INVALID);
        assert_eq!(handle.pack(), 0);
    }

    #[test]
    fn test_pack_layout() {
        let handle: Handle<Texture> = Handle::new(0x1234, 0x0005);
        assert_eq!(handle.pack(), 0x1234_0005);
        assert_eq!(handle.hash_key(), 0x1234_0005);
    }

    #[test]
    fn test_equality_compares_both_fields() {
        let a: Handle<Texture> = Handle::new(3, 1);
        assert_eq!(a, Handle::new(3, 1));
        assert_ne!(a, Handle::new(3, 2));
        assert_ne!(a, Handle::new(4, 1));
    }

    #[test]
    fn test_usable_as_set_key() {
        let mut set: HashSet<Handle<Texture>> = HashSet::new();
        set.insert(Handle::new(1, 1));
        set.insert(Handle::new(1, 1));
        set.insert(Handle::new(1, 2));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_cast_keeps_parts() {
        let tex: Handle<Texture> = Handle::new(9, 4);
        let buf: Handle<Buffer> = tex.cast();
        assert_eq!(buf.index(), 9);
        assert_eq!(buf.generation(), 4);
    }

    #[test]
    fn test_encode_decode_table() {
        let handles: Vec<Handle<Texture>> =
            vec![Handle::new(0, 1), Handle::new(7, 3), Handle::new(0xFFFE, 0xFFFF)];
        let bytes = encode_handles(&handles);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_handles::<Texture>(&bytes), handles);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = encode_handles(&[Handle::<Texture>::new(2, 2)]);
        bytes.push(0xAB);
        assert_eq!(decode_handles::<Texture>(&bytes), vec![Handle::new(2, 2)]);
    }

    #[test]
    fn test_serde_as_packed_integer() {
        #[derive(Serialize, Deserialize)]
        struct Meta {
            texture: Handle<Texture>,
        }

        let meta = Meta {
            texture: Handle::new(1, 2),
        };
        let text = toml::to_string(&meta).unwrap();
        assert_eq!(text.trim(), "texture = 65538");

        let back: Meta = toml::from_str(&text).unwrap();
        assert_eq!(back.texture, Handle::new(1, 2));
    }

    proptest! {
        #[test]
        fn prop_unpack_inverts_pack(index in any::<u16>(), generation in 1u16..=u16::MAX) {
            let handle: Handle<Texture> = Handle::new(index, generation);
            prop_assert!(handle.is_valid());
            prop_assert_eq!(Handle::<Texture>::unpack(handle.pack()), handle);
        }
    }
}
