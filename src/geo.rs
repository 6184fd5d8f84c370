//! Proximity deduplication and geographic output.
//!
//! Multiple users reporting the same physical control produce near-identical
//! records at slightly different coordinates. Clustering merges them: one
//! pass over the records in feed order, first-match-wins against the
//! primaries of already-open clusters. The earliest-reported record within
//! range becomes and stays the primary, so output is stable for a fixed
//! input order.

use crate::models::{Control, ControlCluster};
use serde_json::{json, Value};

/// Clustering distance threshold used when the caller does not supply one.
pub const DEFAULT_MAX_DISTANCE_KM: f64 = 1.5;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates, in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Group records that likely describe the same physical control.
///
/// Records are visited in their original order. Each record joins the
/// first existing cluster whose *primary* lies within `threshold_km`
/// (first match, not nearest match), otherwise it opens a new cluster.
/// `None` disables deduplication: every record becomes its own singleton
/// cluster.
pub fn cluster_controls(records: Vec<Control>, threshold_km: Option<f64>) -> Vec<ControlCluster> {
    let Some(threshold) = threshold_km else {
        return records.into_iter().map(ControlCluster::singleton).collect();
    };

    let mut clusters: Vec<ControlCluster> = Vec::new();
    for record in records {
        let home = clusters.iter_mut().find(|cluster| {
            haversine_km(
                cluster.primary.lat,
                cluster.primary.lng,
                record.lat,
                record.lng,
            ) <= threshold
        });
        match home {
            Some(cluster) => cluster.duplicates.push(record),
            None => clusters.push(ControlCluster::singleton(record)),
        }
    }
    clusters
}

/// Render clusters as a GeoJSON feature collection, one point feature per
/// cluster primary.
pub fn to_feature_collection(clusters: &[ControlCluster]) -> Value {
    let features: Vec<Value> = clusters
        .iter()
        .map(|cluster| {
            let control = &cluster.primary;
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [control.lng, control.lat],
                },
                "properties": {
                    "type": control.control_type.wire_name(),
                    "title": control.title(),
                    "description": control.description,
                },
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ControlType;

    fn control(id: u32, lat: f64, lng: f64) -> Control {
        Control {
            id,
            control_type: ControlType::SpeedTrap,
            county: "Trøndelag".into(),
            municipality: "Trondheim".into(),
            description: format!("kontroll {id}"),
            lat,
            lng,
            timestamp: None,
            last_seen: None,
            confirmed: 0,
        }
    }

    // At 63°N one degree of latitude is ~111.2 km; 0.0072° ≈ 0.8 km.
    const BASE_LAT: f64 = 63.4;
    const BASE_LNG: f64 = 10.4;

    #[test]
    fn test_haversine_zero_distance() {
        assert!(haversine_km(BASE_LAT, BASE_LNG, BASE_LAT, BASE_LNG) < 1e-9);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_km(63.0, 10.0, 64.0, 10.0);
        assert!((d - 111.2).abs() < 0.5, "got {d}");
    }

    #[test]
    fn test_three_records_two_clusters() {
        let records = vec![
            control(1, BASE_LAT, BASE_LNG),
            control(2, BASE_LAT + 0.0072, BASE_LNG), // ~0.8 km away
            control(3, BASE_LAT + 0.45, BASE_LNG),   // ~50 km away
        ];
        let clusters = cluster_controls(records, Some(DEFAULT_MAX_DISTANCE_KM));

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].primary.id, 1);
        assert_eq!(clusters[0].duplicates.len(), 1);
        assert_eq!(clusters[0].duplicates[0].id, 2);
        assert_eq!(clusters[1].primary.id, 3);
        assert!(clusters[1].duplicates.is_empty());
    }

    #[test]
    fn test_disabled_dedup_yields_singletons() {
        let records = vec![
            control(1, BASE_LAT, BASE_LNG),
            control(2, BASE_LAT + 0.0072, BASE_LNG),
            control(3, BASE_LAT + 0.45, BASE_LNG),
        ];
        let clusters = cluster_controls(records, None);
        assert_eq!(clusters.len(), 3);
        assert!(clusters.iter().all(|c| c.duplicates.is_empty()));
    }

    #[test]
    fn test_clustering_primaries_is_idempotent() {
        let records = vec![
            control(1, BASE_LAT, BASE_LNG),
            control(2, BASE_LAT + 0.0072, BASE_LNG),
            control(3, BASE_LAT + 0.45, BASE_LNG),
        ];
        let first = cluster_controls(records, Some(DEFAULT_MAX_DISTANCE_KM));
        let primaries: Vec<Control> = first.iter().map(|c| c.primary.clone()).collect();
        let second = cluster_controls(primaries, Some(DEFAULT_MAX_DISTANCE_KM));

        assert_eq!(second.len(), first.len());
        assert!(second.iter().all(|c| c.duplicates.is_empty()));
    }

    #[test]
    fn test_first_match_wins_over_nearest() {
        // Record 3 is within range of both earlier records but closer to
        // the second; it must still join the first cluster in feed order.
        let records = vec![
            control(1, BASE_LAT, BASE_LNG),
            control(2, BASE_LAT + 0.02, BASE_LNG), // ~2.2 km from record 1
            control(3, BASE_LAT + 0.0112, BASE_LNG), // ~1.25 km from both
        ];
        let clusters = cluster_controls(records, Some(DEFAULT_MAX_DISTANCE_KM));

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].primary.id, 1);
        assert_eq!(clusters[0].duplicates[0].id, 3);
        assert_eq!(clusters[1].primary.id, 2);
    }

    #[test]
    fn test_feature_collection_shape() {
        let clusters = cluster_controls(
            vec![control(1, BASE_LAT, BASE_LNG), control(2, BASE_LAT + 0.45, BASE_LNG)],
            Some(DEFAULT_MAX_DISTANCE_KM),
        );
        let geo = to_feature_collection(&clusters);

        assert_eq!(geo["type"], "FeatureCollection");
        let features = geo["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["geometry"]["type"], "Point");
        // GeoJSON order: [lng, lat]
        assert_eq!(features[0]["geometry"]["coordinates"][0], BASE_LNG);
        assert_eq!(features[0]["geometry"]["coordinates"][1], BASE_LAT);
        assert_eq!(features[0]["properties"]["type"], "Fartskontroll");
    }
}
