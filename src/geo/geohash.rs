// Geohash encoding and radius query planning.
//
// Each stored spark carries a precision-10 geohash. A radius query is turned
// into a handful of prefix ranges over that column: pick the finest precision
// whose cells are at least as large as the query's bounding box, then take
// the cells under the box corners. The union of those cells covers the box,
// so a range scan per cell followed by an exact distance filter finds every
// spark in the circle.

use serde::Serialize;

use super::distance::EARTH_RADIUS_KM;
use crate::spark::Coordinates;

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Precision of the geohash stored with every spark (~1.2 m x 0.6 m cells).
pub const STORED_PRECISION: usize = 10;

/// Longest geohash `encode` will produce.
pub const MAX_PRECISION: usize = 12;

/// Relative padding on the box half-widths to absorb float rounding at the edge.
const EDGE_PAD: f64 = 1e-9;

/// Sorts after every base32 character, so `[cell, cell + "~")` is a prefix range.
const RANGE_SENTINEL: char = '~';

/// Encode a point to a geohash of `precision` characters (clamped to 1..=12).
pub fn encode(point: Coordinates, precision: usize) -> String {
    let precision = precision.clamp(1, MAX_PRECISION);
    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lng_lo, mut lng_hi) = (-180.0_f64, 180.0_f64);

    let mut hash = String::with_capacity(precision);
    let mut even_bit = true;
    let mut bits = 0;
    let mut idx = 0usize;

    while hash.len() < precision {
        if even_bit {
            let mid = (lng_lo + lng_hi) / 2.0;
            if point.longitude >= mid {
                idx = (idx << 1) | 1;
                lng_lo = mid;
            } else {
                idx <<= 1;
                lng_hi = mid;
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            if point.latitude >= mid {
                idx = (idx << 1) | 1;
                lat_lo = mid;
            } else {
                idx <<= 1;
                lat_hi = mid;
            }
        }
        even_bit = !even_bit;
        bits += 1;
        if bits == 5 {
            hash.push(BASE32[idx] as char);
            bits = 0;
            idx = 0;
        }
    }
    hash
}

/// Cell height and width in degrees for a given precision.
pub fn cell_size_degrees(precision: usize) -> (f64, f64) {
    let bits = 5 * precision as i32;
    let lng_bits = (bits + 1) / 2;
    let lat_bits = bits / 2;
    (180.0 / 2f64.powi(lat_bits), 360.0 / 2f64.powi(lng_bits))
}

/// A half-open range `[start, end)` over stored geohashes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CellRange {
    pub start: String,
    pub end: String,
}

impl CellRange {
    /// Every geohash that starts with `cell`.
    pub fn prefix(cell: &str) -> Self {
        Self {
            start: cell.to_string(),
            end: format!("{cell}{RANGE_SENTINEL}"),
        }
    }

    /// The whole keyspace, used when no precision can cover the query box.
    pub fn everything() -> Self {
        Self {
            start: String::new(),
            end: RANGE_SENTINEL.to_string(),
        }
    }

    pub fn contains(&self, geohash: &str) -> bool {
        geohash >= self.start.as_str() && geohash < self.end.as_str()
    }
}

/// Bounding box of a circle on the same sphere `haversine_km` measures on,
/// clamped at the poles. Longitudes may fall outside [-180, 180] when the
/// circle crosses the antimeridian; they are infinite when it covers a pole.
fn circle_bounds(center: Coordinates, radius_km: f64) -> (f64, f64, f64, f64) {
    // Angular radius of the circle, in radians.
    let angle = radius_km / EARTH_RADIUS_KM;
    let lat_delta = angle.to_degrees() * (1.0 + EDGE_PAD);
    let min_lat = (center.latitude - lat_delta).max(-90.0);
    let max_lat = (center.latitude + lat_delta).min(90.0);

    // Widest longitude reached by the circle: asin(sin(d) / cos(lat)).
    let ratio = angle.sin() / center.latitude.to_radians().cos();
    let covers_pole = max_lat >= 90.0 || min_lat <= -90.0;
    let lng_delta = if covers_pole || !ratio.is_finite() || ratio >= 1.0 {
        f64::INFINITY
    } else {
        ratio.asin().to_degrees() * (1.0 + EDGE_PAD)
    };

    (
        min_lat,
        max_lat,
        center.longitude - lng_delta,
        center.longitude + lng_delta,
    )
}

fn wrap_longitude(lng: f64) -> f64 {
    if lng > 180.0 {
        lng - 360.0
    } else if lng < -180.0 {
        lng + 360.0
    } else {
        lng
    }
}

/// Plan the geohash ranges to scan for a radius query.
///
/// The result over-approximates the circle; callers must still filter by
/// exact distance.
pub fn query_ranges(center: Coordinates, radius_km: f64) -> Vec<CellRange> {
    let radius_km = radius_km.max(0.0);
    let (min_lat, max_lat, min_lng, max_lng) = circle_bounds(center, radius_km);
    let box_height = max_lat - min_lat;
    let box_width = max_lng - min_lng;

    if !box_width.is_finite() || box_width >= 360.0 {
        return vec![CellRange::everything()];
    }

    let precision = (1..=STORED_PRECISION).rev().find(|&p| {
        let (cell_h, cell_w) = cell_size_degrees(p);
        cell_h >= box_height && cell_w >= box_width
    });
    let Some(precision) = precision else {
        return vec![CellRange::everything()];
    };

    let mut samples = vec![
        (min_lat, min_lng),
        (min_lat, max_lng),
        (max_lat, min_lng),
        (max_lat, max_lng),
    ];
    // A box straddling the antimeridian also touches the cells on both edges.
    if min_lng < -180.0 || max_lng > 180.0 {
        samples.extend([
            (min_lat, 180.0),
            (max_lat, 180.0),
            (min_lat, -180.0),
            (max_lat, -180.0),
        ]);
    }

    let mut cells: Vec<String> = samples
        .into_iter()
        .map(|(lat, lng)| {
            encode(
                Coordinates {
                    latitude: lat,
                    longitude: wrap_longitude(lng),
                },
                precision,
            )
        })
        .collect();
    cells.sort();
    cells.dedup();
    cells.iter().map(|c| CellRange::prefix(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(lat: f64, lng: f64) -> Coordinates {
        Coordinates::new(lat, lng).unwrap()
    }

    /// A latitude/longitude rectangle in degrees.
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct BoundingBox {
        min_lat: f64,
        max_lat: f64,
        min_lng: f64,
        max_lng: f64,
    }

    impl BoundingBox {
        fn contains(&self, point: Coordinates) -> bool {
            (self.min_lat..=self.max_lat).contains(&point.latitude)
                && (self.min_lng..=self.max_lng).contains(&point.longitude)
        }
    }

    /// The cell a geohash names. Returns None for characters outside the alphabet.
    fn decode_bbox(hash: &str) -> Option<BoundingBox> {
        let mut bbox = BoundingBox {
            min_lat: -90.0,
            max_lat: 90.0,
            min_lng: -180.0,
            max_lng: 180.0,
        };
        let mut even_bit = true;

        for c in hash.bytes() {
            let idx = BASE32.iter().position(|&b| b == c)?;
            for shift in (0..5).rev() {
                let bit = (idx >> shift) & 1 == 1;
                if even_bit {
                    let mid = (bbox.min_lng + bbox.max_lng) / 2.0;
                    if bit {
                        bbox.min_lng = mid;
                    } else {
                        bbox.max_lng = mid;
                    }
                } else {
                    let mid = (bbox.min_lat + bbox.max_lat) / 2.0;
                    if bit {
                        bbox.min_lat = mid;
                    } else {
                        bbox.max_lat = mid;
                    }
                }
                even_bit = !even_bit;
            }
        }
        Some(bbox)
    }

    #[test]
    fn encodes_known_hash() {
        // Reference value from the original geohash.org examples.
        assert_eq!(encode(pt(57.64911, 10.40744), 11), "u4pruydqqvj");
    }

    #[test]
    fn decoded_cell_contains_point() {
        let p = pt(-33.8688, 151.2093);
        let hash = encode(p, STORED_PRECISION);
        assert!(decode_bbox(&hash).unwrap().contains(p));
    }

    #[test]
    fn decode_rejects_invalid_characters() {
        assert!(decode_bbox("u4pa").is_none());
    }

    #[test]
    fn precision_shrinks_with_length() {
        let (h5, w5) = cell_size_degrees(5);
        let (h6, w6) = cell_size_degrees(6);
        assert!(h6 < h5 && w6 < w5);
        assert_eq!(cell_size_degrees(1), (45.0, 45.0));
    }

    #[test]
    fn half_km_query_uses_few_cells() {
        let ranges = query_ranges(pt(40.7128, -74.0060), 0.5);
        assert!(!ranges.is_empty() && ranges.len() <= 4, "{ranges:?}");
        assert!(ranges.iter().all(|r| r.start.len() == 5));
    }

    #[test]
    fn query_ranges_cover_points_on_the_circle_edge() {
        let center = pt(48.8566, 2.3522);
        let ranges = query_ranges(center, 0.5);
        // Points ~0.49 km away in each compass direction.
        let km_per_degree = EARTH_RADIUS_KM.to_radians();
        let d_lat = 0.49 / km_per_degree;
        let d_lng = 0.49 / (km_per_degree * center.latitude.to_radians().cos());
        for p in [
            pt(center.latitude + d_lat, center.longitude),
            pt(center.latitude - d_lat, center.longitude),
            pt(center.latitude, center.longitude + d_lng),
            pt(center.latitude, center.longitude - d_lng),
        ] {
            let hash = encode(p, STORED_PRECISION);
            assert!(ranges.iter().any(|r| r.contains(&hash)), "{p:?} not covered");
        }
    }

    #[test]
    fn box_edges_sit_on_the_circle() {
        use crate::geo::distance::haversine_km;

        for lat in [0.0, 37.5, 65.0] {
            let center = pt(lat, 10.0);
            let (min_lat, max_lat, _, max_lng) = circle_bounds(center, 0.5);
            let north = haversine_km(center, pt(max_lat, 10.0));
            let south = haversine_km(center, pt(min_lat, 10.0));
            assert!(north >= 0.5 && north < 0.5001, "north {north}");
            assert!(south >= 0.5 && south < 0.5001, "south {south}");

            // The circle is widest slightly poleward of its center.
            let edge_lat = (center.latitude.to_radians().sin()
                / (0.5 / EARTH_RADIUS_KM).cos())
            .asin()
            .to_degrees();
            let edge = haversine_km(center, pt(edge_lat, max_lng));
            assert!(edge >= 0.5, "lat {lat}: box edge {edge} km inside the circle");
        }
    }

    #[test]
    fn antimeridian_query_covers_both_sides() {
        let ranges = query_ranges(pt(0.0, 179.999), 1.0);
        let west = encode(pt(0.0, -179.999), STORED_PRECISION);
        let east = encode(pt(0.0, 179.9995), STORED_PRECISION);
        assert!(ranges.iter().any(|r| r.contains(&west)));
        assert!(ranges.iter().any(|r| r.contains(&east)));
    }

    #[test]
    fn polar_query_falls_back_to_full_scan() {
        assert_eq!(query_ranges(pt(90.0, 0.0), 0.5), vec![CellRange::everything()]);
    }

    #[test]
    fn everything_range_contains_any_hash() {
        assert!(CellRange::everything().contains("zzzzzzzzzz"));
        assert!(CellRange::everything().contains("0000000000"));
    }
}
