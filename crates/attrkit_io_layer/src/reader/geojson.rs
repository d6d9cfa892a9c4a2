//! GeoJSON driver built on `serde_json`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde_json::{Map, Value};

use crate::conf::C_COLUMN_GEOMETRY;
use crate::spec::{EnumLayerValue, LayerError, SpecFieldDescriptor, SpecLayerFrame, SpecReadOptions};
use crate::util::{FrameBuilder, derive_field_descriptors};

fn read_document(path: &Path) -> Result<Value, LayerError> {
    let file = File::open(path).map_err(|e| LayerError::io(path, e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Extract the feature list; strict mode requires a `FeatureCollection` or a `Feature`.
fn derive_features(doc: Value, if_relaxed: bool) -> Result<Vec<Value>, LayerError> {
    let c_type = doc.get("type").and_then(Value::as_str).map(str::to_owned);
    match (c_type.as_deref(), doc) {
        (Some("FeatureCollection"), Value::Object(mut dict_doc)) => {
            match dict_doc.remove("features") {
                Some(Value::Array(l_features)) => Ok(l_features),
                Some(Value::Null) | None if if_relaxed => Ok(Vec::new()),
                _ => Err(LayerError::malformed(
                    "GeoJSON",
                    "FeatureCollection has no features array",
                )),
            }
        }
        (Some("Feature"), doc) => Ok(vec![doc]),
        (_, Value::Array(l_features)) if if_relaxed => Ok(l_features),
        (c_type, _) => Err(LayerError::malformed(
            "GeoJSON",
            format!("unsupported top-level type {c_type:?}"),
        )),
    }
}

fn derive_properties<'a>(
    feature: &'a Value,
    n_idx: usize,
    if_relaxed: bool,
) -> Result<Option<&'a Map<String, Value>>, LayerError> {
    let Some(dict_feature) = feature.as_object() else {
        if if_relaxed {
            return Ok(None);
        }
        return Err(LayerError::malformed(
            "GeoJSON feature",
            format!("feature {n_idx} is not an object"),
        ));
    };
    if !if_relaxed && dict_feature.get("type").and_then(Value::as_str) != Some("Feature") {
        return Err(LayerError::malformed(
            "GeoJSON feature",
            format!("feature {n_idx} has no type \"Feature\""),
        ));
    }
    match dict_feature.get("properties") {
        Some(Value::Object(dict_props)) => Ok(Some(dict_props)),
        Some(Value::Null) | None => Ok(None),
        Some(_) if if_relaxed => Ok(None),
        Some(_) => Err(LayerError::malformed(
            "GeoJSON feature",
            format!("feature {n_idx} properties is not an object"),
        )),
    }
}

/// Geometry type label, after a structural check.
fn derive_geometry_kind(
    feature: &Value,
    n_idx: usize,
    if_relaxed: bool,
) -> Result<EnumLayerValue, LayerError> {
    let geometry = match feature.get("geometry") {
        None | Some(Value::Null) => return Ok(EnumLayerValue::Null),
        Some(geometry) => geometry,
    };
    match check_geometry(geometry) {
        Ok(c_kind) => Ok(EnumLayerValue::Text(c_kind.to_string())),
        Err(_) if if_relaxed => Ok(EnumLayerValue::Null),
        Err(c_reason) => Err(LayerError::malformed(
            "GeoJSON geometry",
            format!("feature {n_idx}: {c_reason}"),
        )),
    }
}

fn check_geometry(geometry: &Value) -> Result<&str, String> {
    let c_kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "geometry has no type".to_string())?;
    match c_kind {
        "GeometryCollection" => {
            let l_parts = geometry
                .get("geometries")
                .and_then(Value::as_array)
                .ok_or_else(|| "GeometryCollection has no geometries array".to_string())?;
            for part in l_parts {
                check_geometry(part)?;
            }
        }
        "Point" | "MultiPoint" | "LineString" | "MultiLineString" | "Polygon"
        | "MultiPolygon" => {
            let coords = geometry
                .get("coordinates")
                .ok_or_else(|| format!("{c_kind} has no coordinates"))?;
            if !check_coordinates(coords) {
                return Err(format!("{c_kind} has non-numeric coordinates"));
            }
        }
        _ => return Err(format!("unknown geometry type {c_kind:?}")),
    }
    Ok(c_kind)
}

fn check_coordinates(coords: &Value) -> bool {
    match coords {
        Value::Number(_) => true,
        Value::Array(l_items) => l_items.iter().all(check_coordinates),
        _ => false,
    }
}

fn convert_json_value(value: &Value) -> EnumLayerValue {
    match value {
        Value::Null => EnumLayerValue::Null,
        Value::Bool(val) => EnumLayerValue::Boolean(*val),
        Value::Number(num) => match num.as_i64() {
            Some(val) => EnumLayerValue::Integer(val),
            None => num
                .as_f64()
                .map_or(EnumLayerValue::Null, EnumLayerValue::Float),
        },
        Value::String(val) => EnumLayerValue::Text(val.clone()),
        Value::Array(_) | Value::Object(_) => EnumLayerValue::Text(value.to_string()),
    }
}

/// Union of property names across all features, in first-seen order.
pub(crate) fn read_geojson_schema(
    path: &Path,
    options: &SpecReadOptions,
) -> Result<Vec<SpecFieldDescriptor>, LayerError> {
    let l_features = derive_features(read_document(path)?, options.if_relaxed)?;
    let mut l_fields: Vec<SpecFieldDescriptor> = Vec::new();
    for (n_idx, feature) in l_features.iter().enumerate() {
        if let Some(dict_props) = derive_properties(feature, n_idx, options.if_relaxed)? {
            for name in dict_props.keys() {
                if name != C_COLUMN_GEOMETRY && !l_fields.iter().any(|f| f.name == *name) {
                    l_fields.push(SpecFieldDescriptor::new(name.clone()));
                }
            }
        }
    }
    Ok(l_fields)
}

pub(crate) fn read_geojson_rows(
    path: &Path,
    options: &SpecReadOptions,
) -> Result<SpecLayerFrame, LayerError> {
    let l_features = derive_features(read_document(path)?, options.if_relaxed)?;
    let n_rows = options
        .n_rows_max
        .map_or(l_features.len(), |n_max| n_max.min(l_features.len()));

    let mut builder = FrameBuilder::default();
    for (n_idx, feature) in l_features.iter().take(n_rows).enumerate() {
        let mut l_row: Vec<(String, EnumLayerValue)> = Vec::new();
        if let Some(dict_props) = derive_properties(feature, n_idx, options.if_relaxed)? {
            l_row.extend(
                dict_props
                    .iter()
                    .filter(|(name, _)| *name != C_COLUMN_GEOMETRY)
                    .map(|(name, value)| (name.clone(), convert_json_value(value))),
            );
        }
        if !options.if_skip_geometry {
            l_row.push((
                C_COLUMN_GEOMETRY.to_string(),
                derive_geometry_kind(feature, n_idx, options.if_relaxed)?,
            ));
        }
        builder.push_row(l_row);
    }

    let frame = builder.finish()?;
    let fields = derive_field_descriptors(&frame, &[]);
    Ok(SpecLayerFrame { frame, fields })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::derive_full_read_options;
    use polars::prelude::DataType;

    fn write_doc(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).expect("write geojson");
        path
    }

    const C_DOC_PARCELS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
             "properties": {"zeta": "x", "alpha": 3, "tags": ["a", "b"]}},
            {"type": "Feature", "geometry": null,
             "properties": {"zeta": "y", "alpha": 4.5, "mid": true}}
        ]
    }"#;

    #[test]
    fn keeps_property_order_and_unions_late_keys() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = write_doc(tmp.path(), "parcels.geojson", C_DOC_PARCELS);

        let l_names: Vec<String> = read_geojson_schema(&path, &derive_full_read_options())
            .expect("schema")
            .into_iter()
            .map(|field| field.name)
            .collect();
        assert_eq!(l_names, vec!["zeta", "alpha", "tags", "mid"]);

        let layer = read_geojson_rows(&path, &derive_full_read_options()).expect("rows");
        assert_eq!(layer.frame.height(), 2);
        assert_eq!(
            layer.frame.column("alpha").expect("alpha").dtype(),
            &DataType::Float64
        );
        assert_eq!(
            layer.frame.column("tags").expect("tags").dtype(),
            &DataType::String
        );
        assert_eq!(layer.fields.len(), 4);
    }

    #[test]
    fn bad_geometry_is_strict_error_and_skippable() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = write_doc(
            tmp.path(),
            "bad.geojson",
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": "oops"},
                 "properties": {"id": 1}}
            ]}"#,
        );

        assert!(read_geojson_rows(&path, &derive_full_read_options()).is_err());
        let options = SpecReadOptions {
            if_skip_geometry: true,
            ..Default::default()
        };
        let layer = read_geojson_rows(&path, &options).expect("skip geometry");
        assert_eq!(layer.frame.get_column_names_str(), vec!["id"]);
    }

    #[test]
    fn relaxed_mode_accepts_bare_feature_arrays() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = write_doc(
            tmp.path(),
            "bare.json",
            r#"[{"properties": {"k": "v"}}, {"properties": {"k": "w"}}]"#,
        );

        assert!(read_geojson_rows(&path, &derive_full_read_options()).is_err());
        let options = SpecReadOptions {
            if_relaxed: true,
            n_rows_max: Some(1),
            ..Default::default()
        };
        assert_eq!(read_geojson_rows(&path, &options).expect("relaxed").frame.height(), 1);
    }
}
