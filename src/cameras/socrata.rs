use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use super::{parse_district, Camera, CameraDirectory, ServiceArea};
use crate::ingest::http::build_agent;

pub const DEFAULT_CAMERA_API_BASE: &str = "https://data.austintexas.gov/resource/b4k4-adkb.json";
const ROW_LIMIT: &str = "5000";
const ACTIVE_FILTER: &str = "camera_status='TURNED_ON'";

#[derive(Debug, Deserialize)]
struct CameraRow {
    camera_id: Option<serde_json::Value>,
    location_name: Option<String>,
    location: Option<LocationField>,
    council_district: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LocationField {
    coordinates: Option<Vec<f64>>,
}

/// Socrata open-data camera inventory.
pub struct SocrataDirectory {
    agent: ureq::Agent,
    api_base: String,
    service_area: Option<ServiceArea>,
}

impl SocrataDirectory {
    pub fn new(api_base: impl Into<String>, timeout: Duration, service_area: Option<ServiceArea>) -> Self {
        Self {
            agent: build_agent(timeout, 2),
            api_base: api_base.into(),
            service_area,
        }
    }
}

impl CameraDirectory for SocrataDirectory {
    fn active_cameras(&self) -> Result<Vec<Camera>> {
        let body: serde_json::Value = self
            .agent
            .get(&self.api_base)
            .query("$limit", ROW_LIMIT)
            .query("$where", ACTIVE_FILTER)
            .call()
            .with_context(|| format!("GET {}", self.api_base))?
            .into_json()
            .context("camera inventory was not JSON")?;
        let cameras = parse_inventory(body, self.service_area.as_ref())?;
        log::debug!("camera inventory yielded {} cameras", cameras.len());
        Ok(cameras)
    }
}

/// Turn inventory rows into cameras, dropping rows outside the service area.
///
/// With a service area configured, rows without coordinates are dropped too.
pub fn parse_inventory(body: serde_json::Value, area: Option<&ServiceArea>) -> Result<Vec<Camera>> {
    let rows: Vec<CameraRow> =
        serde_json::from_value(body).context("camera inventory rows did not match schema")?;

    let mut cameras = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(id) = row.camera_id.as_ref().and_then(camera_id_text) else {
            log::debug!("skipping inventory row without camera_id");
            continue;
        };

        let coordinates = row
            .location
            .and_then(|location| location.coordinates)
            .filter(|coords| coords.len() >= 2)
            .map(|coords| (coords[0], coords[1]));

        if let Some(area) = area {
            match coordinates {
                Some((lon, lat)) if area.contains(lon, lat) => {}
                _ => continue,
            }
        }

        cameras.push(Camera {
            id,
            display_name: row.location_name.unwrap_or_default(),
            longitude: coordinates.map(|(lon, _)| lon),
            latitude: coordinates.map(|(_, lat)| lat),
            district: row.council_district.as_ref().and_then(parse_district),
        });
    }
    Ok(cameras)
}

fn camera_id_text(raw: &serde_json::Value) -> Option<String> {
    let text = match raw {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inventory() -> serde_json::Value {
        json!([
            {
                "camera_id": "101",
                "location_name": "LAMAR BLVD / 5TH ST",
                "location": {"type": "Point", "coordinates": [-97.755, 30.269]},
                "council_district": "9"
            },
            {
                "camera_id": 102,
                "location_name": "CONGRESS AVE / RIVERSIDE DR",
                "location": {"type": "Point", "coordinates": [-97.746, 30.258]},
                "council_district": "9, 3"
            },
            {
                "camera_id": "103",
                "location_name": "PARMER LN / MOPAC",
                "location": {"type": "Point", "coordinates": [-97.70, 30.45]},
                "council_district": "north"
            },
            {
                "camera_id": "104",
                "location_name": "NO LOCATION"
            },
            {
                "location_name": "NO ID",
                "location": {"type": "Point", "coordinates": [-97.75, 30.26]}
            }
        ])
    }

    fn downtown() -> ServiceArea {
        ServiceArea::new(vec![[-97.80, 30.20], [-97.70, 30.20], [-97.70, 30.30], [-97.80, 30.30]])
            .unwrap()
    }

    #[test]
    fn keeps_everything_with_id_without_service_area() {
        let cameras = parse_inventory(inventory(), None).unwrap();
        let ids: Vec<_> = cameras.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["101", "102", "103", "104"]);
        assert_eq!(cameras[1].district, Some(9));
        assert_eq!(cameras[2].district, None);
        assert_eq!(cameras[3].coordinates(), None);
    }

    #[test]
    fn filters_to_service_area() {
        let area = downtown();
        let cameras = parse_inventory(inventory(), Some(&area)).unwrap();
        let ids: Vec<_> = cameras.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["101", "102"]);
        assert_eq!(cameras[0].display_name, "LAMAR BLVD / 5TH ST");
        assert_eq!(cameras[0].coordinates(), Some((-97.755, 30.269)));
    }

    #[test]
    fn rejects_non_array_payload() {
        assert!(parse_inventory(json!({"error": "throttled"}), None).is_err());
    }
}
