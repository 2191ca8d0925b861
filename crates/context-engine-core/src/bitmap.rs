//! Range-constrained compressed bitmaps of document ids.
//!
//! A [`Bitmap`] is a keyed [`RoaringBitmap`] whose members must all lie
//! within an immutable [`BitmapRange`]. Every mutator validates its whole
//! input before touching the set, so an out-of-range id never causes a
//! partial update.
//!
//! # Encoding
//!
//! ```text
//! ┌─────────┬──────────┬──────────┬──────────────────────────┐
//! │ ver: u8 │ min: u32 │ max: u32 │ roaring portable format  │
//! │   (1)   │   (LE)   │   (LE)   │ (run/array/bitset conts) │
//! └─────────┴──────────┴──────────┴──────────────────────────┘
//! ```
//!
//! The payload uses the portable Roaring serialization, so bytes written
//! by one backend can be read back by any other.

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current on-disk encoding version.
pub const ENCODING_VERSION: u8 = 1;

const HEADER_LEN: usize = 9;

/// Inclusive `[min, max]` partition a bitmap's members must fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitmapRange {
    pub min: u32,
    pub max: u32,
}

impl BitmapRange {
    /// Ids reserved for system and internal documents.
    pub const INTERNAL: BitmapRange = BitmapRange {
        min: 0,
        max: 99_999,
    };

    /// Ids assigned to user-created documents.
    pub const USER: BitmapRange = BitmapRange {
        min: 100_000,
        max: u32::MAX,
    };

    /// Every representable id.
    pub const FULL: BitmapRange = BitmapRange {
        min: 0,
        max: u32::MAX,
    };

    pub fn new(min: u32, max: u32) -> Result<Self> {
        if min > max {
            return Err(Error::validation(
                "bitmap range",
                format!("min {} is greater than max {}", min, max),
            ));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, value: u32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// A keyed, range-constrained set of document ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    key: String,
    range: BitmapRange,
    members: RoaringBitmap,
}

impl Bitmap {
    /// Create an empty bitmap.
    pub fn new(key: impl Into<String>, range: BitmapRange) -> Self {
        Self {
            key: key.into(),
            range,
            members: RoaringBitmap::new(),
        }
    }

    /// Create a bitmap seeded with `ids`, failing if any id is out of range.
    pub fn with_members(key: impl Into<String>, range: BitmapRange, ids: &[u32]) -> Result<Self> {
        let mut bitmap = Self::new(key, range);
        bitmap.tick_many(ids)?;
        Ok(bitmap)
    }

    /// Wrap an already-computed set, validating its bounds.
    pub fn from_roaring(
        key: impl Into<String>,
        range: BitmapRange,
        members: RoaringBitmap,
    ) -> Result<Self> {
        let bitmap = Self {
            key: key.into(),
            range,
            members,
        };
        bitmap.validate_set(&bitmap.members)?;
        Ok(bitmap)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn range(&self) -> BitmapRange {
        self.range
    }

    /// The underlying Roaring set.
    pub fn members(&self) -> &RoaringBitmap {
        &self.members
    }

    pub fn into_members(self) -> RoaringBitmap {
        self.members
    }

    /// Same members under a different key.
    pub fn rekeyed(&self, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            range: self.range,
            members: self.members.clone(),
        }
    }

    fn check(&self, value: u32) -> Result<()> {
        if self.range.contains(value) {
            Ok(())
        } else {
            Err(Error::Range {
                key: self.key.clone(),
                value,
                min: self.range.min,
                max: self.range.max,
            })
        }
    }

    fn validate_set(&self, set: &RoaringBitmap) -> Result<()> {
        if let Some(min) = set.min() {
            self.check(min)?;
        }
        if let Some(max) = set.max() {
            self.check(max)?;
        }
        Ok(())
    }

    /// Add `id`. Returns `true` if it was not already a member.
    pub fn tick(&mut self, id: u32) -> Result<bool> {
        self.check(id)?;
        Ok(self.members.insert(id))
    }

    /// Remove `id`. Returns `true` if it was a member.
    pub fn untick(&mut self, id: u32) -> Result<bool> {
        self.check(id)?;
        Ok(self.members.remove(id))
    }

    /// Add every id, or none of them if any is out of range.
    ///
    /// Returns the number of ids that were newly added.
    pub fn tick_many(&mut self, ids: &[u32]) -> Result<u64> {
        for &id in ids {
            self.check(id)?;
        }
        let before = self.members.len();
        self.members.extend(ids.iter().copied());
        Ok(self.members.len() - before)
    }

    /// Remove every id, or none of them if any is out of range.
    ///
    /// Returns the number of ids that were removed.
    pub fn untick_many(&mut self, ids: &[u32]) -> Result<u64> {
        for &id in ids {
            self.check(id)?;
        }
        let before = self.members.len();
        for &id in ids {
            self.members.remove(id);
        }
        Ok(before - self.members.len())
    }

    /// Union `other` into this bitmap.
    pub fn tick_bitmap(&mut self, other: &Bitmap) -> Result<u64> {
        self.validate_set(&other.members)?;
        let before = self.members.len();
        self.members |= &other.members;
        Ok(self.members.len() - before)
    }

    /// Subtract `other` from this bitmap.
    pub fn untick_bitmap(&mut self, other: &Bitmap) -> u64 {
        let before = self.members.len();
        self.members -= &other.members;
        before - self.members.len()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.members.contains(id)
    }

    /// Number of members.
    pub fn len(&self) -> u64 {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.members.iter()
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.members.iter().collect()
    }

    /// Encode into the versioned portable format.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.members.serialized_size());
        out.push(ENCODING_VERSION);
        out.extend_from_slice(&self.range.min.to_le_bytes());
        out.extend_from_slice(&self.range.max.to_le_bytes());
        self.members
            .serialize_into(&mut out)
            .map_err(|e| Error::corrupt("bitmap", e.to_string()))?;
        Ok(out)
    }

    /// Decode bytes produced by [`Bitmap::serialize`].
    pub fn deserialize(key: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let key = key.into();
        if bytes.len() < HEADER_LEN {
            return Err(Error::corrupt(
                "bitmap",
                format!("'{}': {} bytes is shorter than the header", key, bytes.len()),
            ));
        }
        if bytes[0] != ENCODING_VERSION {
            return Err(Error::corrupt(
                "bitmap",
                format!("'{}': unsupported encoding version {}", key, bytes[0]),
            ));
        }
        let min = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let max = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        let range = BitmapRange::new(min, max)
            .map_err(|e| Error::corrupt("bitmap", format!("'{}': {}", key, e)))?;
        let members = RoaringBitmap::deserialize_from(&bytes[HEADER_LEN..])
            .map_err(|e| Error::corrupt("bitmap", format!("'{}': {}", key, e)))?;
        Self::from_roaring(key.clone(), range, members)
            .map_err(|e| Error::corrupt("bitmap", format!("'{}': {}", key, e)))
    }
}
