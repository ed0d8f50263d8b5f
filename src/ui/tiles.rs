/// Decoded map tiles for both layers
///
/// A tile is claimed (pending) before its request starts so it is fetched
/// once, then resolved to a display handle or marked failed.

use iced::widget::image::Handle;
use std::collections::{HashMap, HashSet};

use crate::remote::{TileId, TileLayer};

/// Settled tiles beyond this count are dropped when off screen
const MAX_TILES: usize = 600;

#[derive(Debug, Clone)]
enum TileSlot {
    Pending,
    Ready(Handle),
    Failed,
}

#[derive(Debug, Default)]
pub struct TileCache {
    entries: HashMap<(TileLayer, TileId), TileSlot>,
}

impl TileCache {
    /// Mark tiles not yet known as pending and return them for fetching
    pub fn claim(&mut self, layer: TileLayer, tiles: impl IntoIterator<Item = TileId>) -> Vec<TileId> {
        let mut claimed = Vec::new();
        for tile in tiles {
            if !self.entries.contains_key(&(layer, tile)) {
                self.entries.insert((layer, tile), TileSlot::Pending);
                claimed.push(tile);
            }
        }
        claimed
    }

    pub fn resolve(&mut self, layer: TileLayer, tile: TileId, result: Result<Handle, String>) {
        let slot = match result {
            Ok(handle) => TileSlot::Ready(handle),
            Err(err) => {
                tracing::debug!("{:?} tile {} failed: {}", layer, tile, err);
                TileSlot::Failed
            }
        };
        self.entries.insert((layer, tile), slot);
    }

    pub fn get(&self, layer: TileLayer, tile: TileId) -> Option<&Handle> {
        match self.entries.get(&(layer, tile)) {
            Some(TileSlot::Ready(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Allow failed tiles of `layer` to be fetched again
    pub fn forget_failed(&mut self, layer: TileLayer) {
        self.entries
            .retain(|(l, _), slot| *l != layer || !matches!(slot, TileSlot::Failed));
    }

    /// Keep the cache bounded; pending and visible tiles always stay
    pub fn prune(&mut self, visible: &HashSet<TileId>) {
        if self.entries.len() <= MAX_TILES {
            return;
        }
        self.entries.retain(|(_, tile), slot| {
            matches!(slot, TileSlot::Pending) || visible.contains(tile)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(x: u32) -> TileId {
        TileId { zoom: 3, x, y: 1 }
    }

    fn handle() -> Handle {
        Handle::from_bytes(vec![0u8; 4])
    }

    #[test]
    fn test_tiles_are_claimed_once() {
        let mut cache = TileCache::default();
        assert_eq!(cache.claim(TileLayer::Basemap, [tile(0), tile(1)]), vec![tile(0), tile(1)]);
        assert!(cache.claim(TileLayer::Basemap, [tile(1)]).is_empty());

        // Layers are independent
        assert_eq!(cache.claim(TileLayer::Historical, [tile(1)]), vec![tile(1)]);
        assert!(cache.get(TileLayer::Basemap, tile(0)).is_none());
    }

    #[test]
    fn test_resolved_tiles_are_drawable() {
        let mut cache = TileCache::default();
        cache.claim(TileLayer::Basemap, [tile(0), tile(1)]);
        cache.resolve(TileLayer::Basemap, tile(0), Ok(handle()));
        cache.resolve(TileLayer::Basemap, tile(1), Err("HTTP 404".to_string()));

        assert!(cache.get(TileLayer::Basemap, tile(0)).is_some());
        assert!(cache.get(TileLayer::Basemap, tile(1)).is_none());
        assert!(cache.claim(TileLayer::Basemap, [tile(1)]).is_empty());
    }

    #[test]
    fn test_failed_tiles_can_be_retried() {
        let mut cache = TileCache::default();
        cache.claim(TileLayer::Historical, [tile(0)]);
        cache.resolve(TileLayer::Historical, tile(0), Err("HTTP 401".to_string()));

        cache.forget_failed(TileLayer::Historical);
        assert_eq!(cache.claim(TileLayer::Historical, [tile(0)]), vec![tile(0)]);
    }

    #[test]
    fn test_prune_keeps_visible_and_pending() {
        let mut cache = TileCache::default();
        let all: Vec<TileId> = (0..MAX_TILES as u32 + 10).map(tile).collect();
        cache.claim(TileLayer::Basemap, all.iter().copied());
        for &t in &all[1..] {
            cache.resolve(TileLayer::Basemap, t, Ok(handle()));
        }

        let visible: HashSet<TileId> = [tile(5)].into_iter().collect();
        cache.prune(&visible);

        // tile(0) is still in flight
        assert_eq!(cache.entries.len(), 2);
        assert!(cache.get(TileLayer::Basemap, tile(5)).is_some());
        assert!(cache.claim(TileLayer::Basemap, [tile(0)]).is_empty());
    }
}
