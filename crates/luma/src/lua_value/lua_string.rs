// Interned byte strings.
//
// Identity is value-based: two strings are equal iff their bytes are equal.
// Short strings are deduplicated through a small direct-mapped cache, so
// equal short strings usually share an id, but id inequality never implies
// content inequality — comparisons always fall back to hash + bytes.

use std::rc::Rc;

use ahash::RandomState;

use crate::heap::{AllocationTracker, StringId};
use crate::lua_vm::{LuaError, LuaResult};

/// Strings shorter than this go through the dedup cache.
pub const SHORT_STRING_LIMIT: usize = 32;

/// Slots in the direct-mapped short-string cache.
pub const STRING_CACHE_SLOTS: usize = 128;

const CACHE_EMPTY: u32 = u32::MAX;

/// An immutable Lua string: a view into shared backing bytes plus the cached
/// content hash.
#[derive(Clone, Debug)]
pub struct LuaStr {
    data: Rc<[u8]>,
    off: u32,
    len: u32,
    pub hash: u64,
}

impl LuaStr {
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.off as usize..(self.off + self.len) as usize]
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lossy UTF-8 view for display purposes. Lua strings are raw bytes; this
    /// is only used when rendering messages.
    pub fn display(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

/// Pool of all strings owned by one state, with the short-string cache.
///
/// The state is single-threaded (`Rc` makes it `!Send`), so this per-state
/// cache is per-OS-thread by construction; no locking anywhere.
pub struct StringPool {
    items: Vec<LuaStr>,
    cache: [u32; STRING_CACHE_SLOTS],
    hasher: RandomState,
}

impl StringPool {
    pub fn new() -> Self {
        // Fixed seeds: key hashes must be stable for the lifetime of the pool
        // and across pools, since table layouts embed them.
        Self {
            items: Vec::new(),
            cache: [CACHE_EMPTY; STRING_CACHE_SLOTS],
            hasher: RandomState::with_seeds(
                0x9e37_79b9_7f4a_7c15,
                0x2545_f491_4f6c_dd1d,
                0x27d4_eb2f_1656_67c5,
                0x1656_67b1_9e37_79f9,
            ),
        }
    }

    #[inline]
    pub fn hash_bytes(&self, bytes: &[u8]) -> u64 {
        self.hasher.hash_one(bytes)
    }

    #[inline(always)]
    pub fn get(&self, id: StringId) -> &LuaStr {
        &self.items[id.index()]
    }

    #[inline(always)]
    pub fn slice(&self) -> &[LuaStr] {
        &self.items
    }

    #[inline]
    pub fn content_eq(&self, a: StringId, b: StringId) -> bool {
        if a == b {
            return true;
        }
        let (a, b) = (&self.items[a.index()], &self.items[b.index()]);
        a.hash == b.hash && a.as_bytes() == b.as_bytes()
    }

    /// Intern `bytes`, reusing a cached id for short strings when possible.
    pub fn intern(&mut self, bytes: &[u8], tracker: &mut dyn AllocationTracker) -> LuaResult<StringId> {
        let hash = self.hash_bytes(bytes);
        if bytes.len() < SHORT_STRING_LIMIT {
            let slot = (hash as usize) & (STRING_CACHE_SLOTS - 1);
            let cached = self.cache[slot];
            if cached != CACHE_EMPTY {
                let s = &self.items[cached as usize];
                if s.hash == hash && s.as_bytes() == bytes {
                    return Ok(StringId(cached));
                }
            }
            let id = self.push_new(bytes, hash, tracker)?;
            self.cache[slot] = id.0;
            Ok(id)
        } else {
            self.push_new(bytes, hash, tracker)
        }
    }

    fn push_new(
        &mut self,
        bytes: &[u8],
        hash: u64,
        tracker: &mut dyn AllocationTracker,
    ) -> LuaResult<StringId> {
        if !tracker.track(bytes.len() + std::mem::size_of::<LuaStr>()) {
            return Err(LuaError::OutOfMemory);
        }
        let id = StringId(self.items.len() as u32);
        self.items.push(LuaStr {
            data: Rc::from(bytes),
            off: 0,
            len: bytes.len() as u32,
            hash,
        });
        Ok(id)
    }

    /// Substring over the byte range `start..end` of `id`. When the visible
    /// fraction exceeds one half the backing bytes are aliased; otherwise the
    /// bytes are copied (and short results re-enter the dedup cache).
    pub fn substring(
        &mut self,
        id: StringId,
        start: usize,
        end: usize,
        tracker: &mut dyn AllocationTracker,
    ) -> LuaResult<StringId> {
        let src = &self.items[id.index()];
        let parent_len = src.len();
        let start = start.min(parent_len);
        let end = end.clamp(start, parent_len);
        let visible = end - start;

        if visible * 2 > parent_len {
            if !tracker.track(std::mem::size_of::<LuaStr>()) {
                return Err(LuaError::OutOfMemory);
            }
            let data = Rc::clone(&src.data);
            let off = src.off + start as u32;
            let view = LuaStr {
                hash: self.hash_bytes(&data[off as usize..off as usize + visible]),
                data,
                off,
                len: visible as u32,
            };
            let new_id = StringId(self.items.len() as u32);
            self.items.push(view);
            Ok(new_id)
        } else {
            let bytes: Vec<u8> = src.as_bytes()[start..end].to_vec();
            self.intern(&bytes, tracker)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::UnboundedTracker;

    #[test]
    fn short_strings_share_ids_through_cache() {
        let mut pool = StringPool::new();
        let mut tracker = UnboundedTracker;
        let a = pool.intern(b"hello", &mut tracker).unwrap();
        let b = pool.intern(b"hello", &mut tracker).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn long_strings_compare_by_content() {
        let mut pool = StringPool::new();
        let mut tracker = UnboundedTracker;
        let text = [b'x'; 100];
        let a = pool.intern(&text, &mut tracker).unwrap();
        let b = pool.intern(&text, &mut tracker).unwrap();
        assert_ne!(a, b);
        assert!(pool.content_eq(a, b));
    }

    #[test]
    fn large_substring_aliases_backing_bytes() {
        let mut pool = StringPool::new();
        let mut tracker = UnboundedTracker;
        let text: Vec<u8> = (0..100u8).collect();
        let a = pool.intern(&text, &mut tracker).unwrap();
        let sub = pool.substring(a, 10, 90, &mut tracker).unwrap();
        assert_eq!(pool.get(sub).as_bytes(), &text[10..90]);
        // 80 of 100 bytes visible: aliased, same backing allocation
        let parent_ptr = pool.get(a).as_bytes().as_ptr() as usize;
        let sub_ptr = pool.get(sub).as_bytes().as_ptr() as usize;
        assert_eq!(sub_ptr, parent_ptr + 10);
    }

    #[test]
    fn small_substring_copies() {
        let mut pool = StringPool::new();
        let mut tracker = UnboundedTracker;
        let text: Vec<u8> = (0..100u8).collect();
        let a = pool.intern(&text, &mut tracker).unwrap();
        let sub = pool.substring(a, 0, 10, &mut tracker).unwrap();
        assert_eq!(pool.get(sub).as_bytes(), &text[..10]);
        let parent_ptr = pool.get(a).as_bytes().as_ptr() as usize;
        let sub_ptr = pool.get(sub).as_bytes().as_ptr() as usize;
        assert_ne!(sub_ptr, parent_ptr);
    }
}
