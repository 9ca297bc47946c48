use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Service area polygon as `[longitude, latitude]` vertices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceArea {
    vertices: Vec<[f64; 2]>,
}

impl ServiceArea {
    pub fn new(vertices: Vec<[f64; 2]>) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(anyhow!(
                "service area needs at least 3 vertices, got {}",
                vertices.len()
            ));
        }
        if vertices.iter().flatten().any(|v| !v.is_finite()) {
            return Err(anyhow!("service area vertices must be finite"));
        }
        Ok(Self { vertices })
    }

    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.vertices
    }

    /// Ray-casting point-in-polygon test.
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        let mut inside = false;
        let n = self.vertices.len();
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = self.vertices[i];
            let [xj, yj] = self.vertices[j];
            if (yi > latitude) != (yj > latitude)
                && longitude < (xj - xi) * (latitude - yi) / (yj - yi) + xi
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}
