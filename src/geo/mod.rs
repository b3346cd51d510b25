// Geospatial indexing: geohash encoding, distance, and the nearby-spark index.

pub mod distance;
pub mod geohash;
pub mod index;

pub use index::{GeoIndex, NearbySubscription, NearbyUpdate, SparkEvent, SparkFeed};
