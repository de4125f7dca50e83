//! County boundaries from a GeoJSON `FeatureCollection`.

use crate::error::{Error, Result};
use crate::record::{CountyRecord, Geometry, pad_fips};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;

fn ring(value: &JsonValue) -> Option<Vec<(f64, f64)>> {
    value
        .as_array()?
        .iter()
        .map(|p| Some((p.get(0)?.as_f64()?, p.get(1)?.as_f64()?)))
        .collect()
}

/// Outer rings of a Polygon or MultiPolygon geometry object.
fn outer_rings(geometry: &JsonValue) -> Option<Vec<Vec<(f64, f64)>>> {
    let coordinates = geometry.get("coordinates")?.as_array()?;
    match geometry.get("type")?.as_str()? {
        "Polygon" => Some(vec![ring(coordinates.first()?)?]),
        "MultiPolygon" => coordinates
            .iter()
            .map(|polygon| ring(polygon.as_array()?.first()?))
            .collect(),
        _ => None,
    }
}

/// Outer rings of each feature in a GeoJSON collection, keyed by padded FIPS.
pub fn parse_geometry(json: &JsonValue, id_property: &str) -> Result<HashMap<String, Geometry>> {
    let features = json
        .get("features")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| Error::DataFetch("GeoJSON has no `features` array".into()))?;

    let mut out = HashMap::with_capacity(features.len());
    let mut skipped = 0usize;
    for feature in features {
        let id = feature
            .get("properties")
            .and_then(|p| p.get(id_property))
            .and_then(|id| match id {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .and_then(|id| pad_fips(&id).ok());
        let rings = feature.get("geometry").and_then(outer_rings);
        match (id, rings) {
            (Some(id), Some(rings)) => {
                out.insert(id, Geometry { rings });
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!(
            target: crate::LOG_TARGET,
            "skipped {skipped} GeoJSON features without id or polygon"
        );
    }
    Ok(out)
}

/// Reads a GeoJSON file and parses it as [`parse_geometry`] does.
pub fn load_geometry(path: &Path, id_property: &str) -> Result<HashMap<String, Geometry>> {
    let file = std::fs::File::open(path)?;
    let json: JsonValue = serde_json::from_reader(std::io::BufReader::new(file))?;
    parse_geometry(&json, id_property)
}

/// Moves boundaries onto matching records; returns how many matched.
pub fn attach_geometry(
    records: &mut [CountyRecord],
    mut shapes: HashMap<String, Geometry>,
) -> usize {
    let mut matched = 0;
    for record in records.iter_mut() {
        if let Some(shape) = shapes.remove(&record.fips) {
            record.geometry = Some(shape);
            matched += 1;
        }
    }
    log::debug!(
        target: crate::LOG_TARGET,
        "attached geometry to {matched}/{} counties",
        records.len()
    );
    matched
}
