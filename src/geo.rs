use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, anyhow};

/// Mean Earth radius, kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const KM_PER_DEG_LAT: f64 = 111.32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone)]
pub struct ZipCentroid {
    pub zip5: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeocodeError {
    #[error("malformed postal code: {0:?}")]
    InvalidZip(String),
    #[error("postal code not in the geocoding dataset: {0}")]
    NotFound(String),
}

/// Lenient zip5 extraction for dataset ingest: leading digit run, first five
/// digits win (handles ZIP+4 and padded values in source files).
pub fn normalize_zip5(s: &str) -> Option<String> {
    let mut digits = String::with_capacity(5);
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 5 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.len() == 5 { Some(digits) } else { None }
}

/// Strict zip5 validation for request input: exactly five digits, or
/// five-plus-four. Anything else is rejected rather than truncated.
pub fn canonical_zip5(s: &str) -> Option<String> {
    let s = s.trim();
    let (head, tail) = match s.len() {
        5 => (s, ""),
        10 => match s.split_once('-') {
            Some((h, t)) => (h, t),
            None => return None,
        },
        _ => return None,
    };
    if head.len() == 5
        && head.chars().all(|c| c.is_ascii_digit())
        && tail.chars().all(|c| c.is_ascii_digit())
    {
        Some(head.to_string())
    } else {
        None
    }
}

/// GeoNames tab-separated postal file (US.txt): country, postal code, place,
/// admin fields, then latitude and longitude in columns 10 and 11.
pub fn parse_geonames_us_txt(path: &Path) -> anyhow::Result<Vec<ZipCentroid>> {
    let data = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut out = Vec::new();
    for (lineno, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 11 {
            return Err(anyhow!(
                "GeoNames line {} has too few columns ({}): {}",
                lineno + 1,
                parts.len(),
                line
            ));
        }
        let Some(zip5) = normalize_zip5(parts[1]) else {
            continue;
        };
        let lat: f64 = parts[9].parse().context("parse lat")?;
        let lon: f64 = parts[10].parse().context("parse lon")?;
        out.push(ZipCentroid { zip5, lat, lon });
    }
    Ok(out)
}

/// Offline postal-code → centroid lookup. Loaded once at startup, immutable
/// for the process lifetime; resolution is a pure in-memory lookup.
pub struct Geocoder {
    centroids: HashMap<String, Point>,
}

impl Geocoder {
    pub fn from_centroids(list: Vec<ZipCentroid>) -> Self {
        let mut centroids = HashMap::with_capacity(list.len());
        for c in list {
            centroids.insert(c.zip5, Point { lat: c.lat, lon: c.lon });
        }
        Self { centroids }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let list = parse_geonames_us_txt(path)?;
        if list.is_empty() {
            return Err(anyhow!("no ZIP centroids found in {}", path.display()));
        }
        Ok(Self::from_centroids(list))
    }

    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    pub fn resolve(&self, postal_code: &str) -> Result<Point, GeocodeError> {
        let zip5 = canonical_zip5(postal_code)
            .ok_or_else(|| GeocodeError::InvalidZip(postal_code.to_string()))?;
        self.centroids
            .get(&zip5)
            .copied()
            .ok_or(GeocodeError::NotFound(zip5))
    }
}

/// Great-circle distance in kilometers (haversine).
pub fn haversine_km(a: Point, b: Point) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Bounding box used as the coarse spatial pre-filter. The box over-covers
/// the circle; the exact haversine pass enforces the radius contract.
#[derive(Debug, Clone, Copy)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeoBounds {
    pub fn around(origin: Point, radius_km: f64) -> Self {
        let dlat = radius_km / KM_PER_DEG_LAT;
        // Longitude degrees shrink toward the poles; keep the divisor away
        // from zero so the box stays finite.
        let cos_lat = origin.lat.to_radians().cos().max(0.01);
        let dlon = radius_km / (KM_PER_DEG_LAT * cos_lat);
        Self {
            min_lat: (origin.lat - dlat).max(-90.0),
            max_lat: (origin.lat + dlat).min(90.0),
            min_lon: (origin.lon - dlon).max(-180.0),
            max_lon: (origin.lon + dlon).min(180.0),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.lat >= self.min_lat
            && p.lat <= self.max_lat
            && p.lon >= self.min_lon
            && p.lon <= self.max_lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NYC: Point = Point { lat: 40.7128, lon: -74.0060 };
    const LA: Point = Point { lat: 34.0522, lon: -118.2437 };

    #[test]
    fn normalize_zip5_cases() {
        assert_eq!(normalize_zip5("10001"), Some("10001".to_string()));
        assert_eq!(normalize_zip5("10001-1234"), Some("10001".to_string()));
        assert_eq!(normalize_zip5("123456"), Some("12345".to_string()));
        assert_eq!(normalize_zip5("1234"), None);
        assert_eq!(normalize_zip5("abcde"), None);
    }

    #[test]
    fn canonical_zip5_is_strict() {
        assert_eq!(canonical_zip5("10001"), Some("10001".to_string()));
        assert_eq!(canonical_zip5(" 10001 "), Some("10001".to_string()));
        assert_eq!(canonical_zip5("10001-1234"), Some("10001".to_string()));
        assert_eq!(canonical_zip5("123456"), None);
        assert_eq!(canonical_zip5("1234"), None);
        assert_eq!(canonical_zip5("1000a"), None);
        assert_eq!(canonical_zip5(""), None);
    }

    #[test]
    fn haversine_known_distances() {
        assert!(haversine_km(NYC, NYC) < 1e-9);
        let d = haversine_km(NYC, LA);
        assert!((3900.0..3975.0).contains(&d), "NYC-LA was {d}");
        // One degree of latitude is about 111 km.
        let a = Point { lat: 40.0, lon: -74.0 };
        let b = Point { lat: 41.0, lon: -74.0 };
        let d = haversine_km(a, b);
        assert!((110.0..112.5).contains(&d), "1 deg lat was {d}");
    }

    #[test]
    fn bounds_cover_the_radius() {
        let bounds = GeoBounds::around(NYC, 40.0);
        assert!(bounds.contains(NYC));
        // A point ~39 km north is still inside the box.
        let north = Point { lat: NYC.lat + 0.35, lon: NYC.lon };
        assert!(haversine_km(NYC, north) < 40.0);
        assert!(bounds.contains(north));
        assert!(!bounds.contains(LA));
    }

    #[test]
    fn geocoder_resolution_and_errors() {
        let geocoder = Geocoder::from_centroids(vec![ZipCentroid {
            zip5: "10001".to_string(),
            lat: 40.75,
            lon: -73.99,
        }]);
        let p = geocoder.resolve("10001").unwrap();
        assert!((p.lat - 40.75).abs() < 1e-9);
        assert_eq!(
            geocoder.resolve("00000"),
            Err(GeocodeError::NotFound("00000".to_string()))
        );
        assert_eq!(
            geocoder.resolve("not-a-zip"),
            Err(GeocodeError::InvalidZip("not-a-zip".to_string()))
        );
    }
}
