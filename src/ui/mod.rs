/// Presentation layer widgets
///
/// - Map canvas: tiles, click surface, marker, box (map.rs)
/// - Tile cache for the basemap and historical layers (tiles.rs)
/// - Pipeline progress stream for the subscription (progress.rs)
/// - Original/colorized image panel (gallery.rs)

pub mod gallery;
pub mod map;
pub mod progress;
pub mod tiles;
