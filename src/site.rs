use serde::{Deserialize, Serialize};

use crate::metadata::GeoPoint;

/// A site boundary stored as a GeoJSON-style polygon: the first ring is the
/// outer boundary, any further rings are holes. Coordinates are [lon, lat].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SiteBoundary {
    #[serde(rename = "type")]
    pub shape_type: String,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl SiteBoundary {
    pub fn polygon(outer: Vec<GeoPoint>, holes: Vec<Vec<GeoPoint>>) -> Self {
        let ring = |points: Vec<GeoPoint>| points.into_iter().map(|p| [p.lon, p.lat]).collect();
        let mut coordinates: Vec<Vec<[f64; 2]>> = vec![ring(outer)];
        coordinates.extend(holes.into_iter().map(ring));
        Self {
            shape_type: "polygon".into(),
            coordinates,
        }
    }

    pub fn outer_ring(&self) -> impl Iterator<Item = GeoPoint> + '_ {
        self.coordinates
            .first()
            .into_iter()
            .flatten()
            .map(|c| GeoPoint::new(c[1], c[0]))
    }
}

/// One document in the sites index. The boundary polygon is what the
/// site-detection multi-search intersects image positions against.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteDocument {
    pub name: String,
    pub code: String,
    #[serde(rename = "type")]
    pub site_type: String,
    #[serde(default)]
    pub details: Vec<String>,
    pub boundary: SiteBoundary,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_site() -> SiteDocument {
        SiteDocument {
            name: "Santa Rita Experimental Range".into(),
            code: "SRER".into(),
            site_type: "NEON".into(),
            details: vec!["state:AZ".into()],
            boundary: SiteBoundary::polygon(
                vec![
                    GeoPoint::new(31.7, -110.9),
                    GeoPoint::new(31.7, -110.8),
                    GeoPoint::new(31.9, -110.8),
                    GeoPoint::new(31.9, -110.9),
                    GeoPoint::new(31.7, -110.9),
                ],
                Vec::new(),
            ),
        }
    }

    #[test]
    fn boundary_serializes_as_geo_shape() {
        let site = square_site();
        let value = serde_json::to_value(&site).unwrap();
        assert_eq!(value["boundary"]["type"], "polygon");
        // GeoJSON order is [lon, lat].
        assert_eq!(value["boundary"]["coordinates"][0][0][0], -110.9);
        assert_eq!(value["boundary"]["coordinates"][0][0][1], 31.7);
        let decoded: SiteDocument = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, site);
    }

    #[test]
    fn outer_ring_restores_lat_lon_order() {
        let site = square_site();
        let first = site.boundary.outer_ring().next().unwrap();
        assert_eq!(first, GeoPoint::new(31.7, -110.9));
    }
}
