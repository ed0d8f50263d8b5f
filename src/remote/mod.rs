/// Remote collaborators of the pipeline
///
/// - Earth Engine authorization (auth.rs)
/// - Historical imagery service (imagery.rs)
/// - Generative colorization model (colorizer.rs)
/// - Basemap and historical map tiles (tiles.rs)
///
/// The imagery service and the model are each a trait plus one HTTP-backed
/// implementation, so the coordinator can be driven by fakes in tests.

pub mod auth;
pub mod colorizer;
pub mod imagery;
pub mod tiles;

pub use auth::AccessTokens;
pub use colorizer::{Colorizer, GeminiColorizer, ModelError};
pub use imagery::{EarthEngineFetcher, FetchError, ImageryFetcher};
pub use tiles::{TileClient, TileId, TileLayer};
