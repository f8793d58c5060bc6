//! Item storage attached to core tiles.
//!
//! The snapshot's first section carries one item set per core tile; each set
//! fully replaces what the tile held before.

use crate::io::{ByteReader, ByteWriter, ReadError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Packed tile position as sent by the server.
pub type TilePos = i32;

/// Item id.
pub type ItemId = u16;

/// Item amounts held by one tile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemModule {
    items: BTreeMap<ItemId, i32>,
}

impl ItemModule {
    /// Create an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Amount of `item` held (0 when absent).
    pub fn get(&self, item: ItemId) -> i32 {
        self.items.get(&item).copied().unwrap_or(0)
    }

    /// Set the amount of `item`. Zero removes the entry.
    pub fn set(&mut self, item: ItemId, amount: i32) {
        if amount == 0 {
            self.items.remove(&item);
        } else {
            self.items.insert(item, amount);
        }
    }

    /// Sum of all amounts.
    pub fn total(&self) -> i64 {
        self.items.values().map(|&a| i64::from(a)).sum()
    }

    /// Number of distinct items held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replace contents from `reader`: `u8 count`, then `(u16 item, i32 amount)` pairs.
    pub fn read(&mut self, reader: &mut ByteReader<'_>) -> Result<(), ReadError> {
        let count = reader.u8()?;
        let mut items = BTreeMap::new();
        for _ in 0..count {
            let item = reader.u16()?;
            let amount = reader.i32()?;
            if amount != 0 {
                items.insert(item, amount);
            }
        }
        self.items = items;
        Ok(())
    }

    /// Serialize in the format [`ItemModule::read`] expects.
    pub fn write(&self, writer: &mut ByteWriter) {
        let count = self.items.len().min(u8::MAX as usize);
        writer.u8(count as u8);
        for (&item, &amount) in self.items.iter().take(count) {
            writer.u16(item).i32(amount);
        }
    }
}

/// Item modules of every core tile the client has heard about.
#[derive(Debug, Clone, Default)]
pub struct CoreStorage {
    tiles: BTreeMap<TilePos, ItemModule>,
}

impl CoreStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Items held by the core at `pos`, if known.
    pub fn items(&self, pos: TilePos) -> Option<&ItemModule> {
        self.tiles.get(&pos)
    }

    /// Items of the core at `pos`, creating an empty module on first use.
    pub fn items_mut(&mut self, pos: TilePos) -> &mut ItemModule {
        self.tiles.entry(pos).or_default()
    }

    /// Number of known core tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether no core tile is known.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Forget all cores.
    pub fn clear(&mut self) {
        self.tiles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_replaces_previous_contents() {
        let mut module = ItemModule::new();
        module.set(1, 50);

        let mut next = ItemModule::new();
        next.set(2, 10);
        next.set(3, 4);
        let mut w = ByteWriter::new();
        next.write(&mut w);

        module.read(&mut ByteReader::new(w.as_slice())).unwrap();
        assert_eq!(module, next);
        assert_eq!(module.get(1), 0);
        assert_eq!(module.total(), 14);
    }

    #[test]
    fn truncated_module_fails() {
        let mut module = ItemModule::new();
        // claims two entries, carries one
        let bytes = [2, 0, 1, 0, 0, 0, 9];
        assert!(module.read(&mut ByteReader::new(&bytes)).is_err());
    }

    #[test]
    fn storage_creates_on_demand() {
        let mut storage = CoreStorage::new();
        assert!(storage.items(42).is_none());
        storage.items_mut(42).set(0, 1);
        assert_eq!(storage.items(42).unwrap().get(0), 1);
        storage.clear();
        assert!(storage.is_empty());
    }
}
