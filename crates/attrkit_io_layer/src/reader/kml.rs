//! KML driver: one row per `Placemark`, parsed with `roxmltree`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use roxmltree::{Document, Node};

use crate::conf::C_COLUMN_GEOMETRY;
use crate::spec::{EnumLayerValue, LayerError, SpecFieldDescriptor, SpecLayerFrame, SpecReadOptions};
use crate::util::{FrameBuilder, derive_field_descriptors};

const TUP_KML_GEOMETRY_TAGS: [&str; 6] = [
    "Point",
    "LineString",
    "LinearRing",
    "Polygon",
    "MultiGeometry",
    "Model",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumKmlFieldType {
    Integer,
    Float,
    Boolean,
    Text,
}

impl EnumKmlFieldType {
    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "int" | "uint" | "short" | "ushort" => Self::Integer,
            "float" | "double" => Self::Float,
            "bool" => Self::Boolean,
            _ => Self::Text,
        }
    }

    fn convert(self, text: &str) -> EnumLayerValue {
        let text = text.trim();
        if text.is_empty() {
            return EnumLayerValue::Null;
        }
        let value = match self {
            Self::Integer => text.parse().ok().map(EnumLayerValue::Integer),
            Self::Float => text.parse().ok().map(EnumLayerValue::Float),
            Self::Boolean => match text {
                "1" | "true" => Some(EnumLayerValue::Boolean(true)),
                "0" | "false" => Some(EnumLayerValue::Boolean(false)),
                _ => None,
            },
            Self::Text => None,
        };
        value.unwrap_or_else(|| EnumLayerValue::Text(text.to_string()))
    }
}

/// Declared `SimpleField`s: type plus optional display name.
#[derive(Debug, Default)]
struct SpecKmlSchema {
    l_fields: Vec<SpecFieldDescriptor>,
    dict_type_by_name: HashMap<String, EnumKmlFieldType>,
}

fn read_text(path: &Path, if_relaxed: bool) -> Result<String, LayerError> {
    let v_bytes = fs::read(path).map_err(|e| LayerError::io(path, e))?;
    if if_relaxed {
        return Ok(String::from_utf8_lossy(&v_bytes).into_owned());
    }
    String::from_utf8(v_bytes)
        .map_err(|err| LayerError::malformed("KML", format!("not valid UTF-8: {err}")))
}

fn parse_document<'i>(text: &'i str, if_relaxed: bool) -> Result<Document<'i>, LayerError> {
    let doc = Document::parse(text)?;
    if !if_relaxed && !doc.root_element().has_tag_name("kml") {
        return Err(LayerError::malformed(
            "KML",
            format!("root element is <{}>", doc.root_element().tag_name().name()),
        ));
    }
    Ok(doc)
}

fn child_text<'a>(node: Node<'a, '_>, tag: &str) -> Option<&'a str> {
    node.children()
        .find(|child| child.has_tag_name(tag))
        .and_then(|child| child.text())
}

fn collect_schema(doc: &Document<'_>) -> SpecKmlSchema {
    let mut schema = SpecKmlSchema::default();
    for node_field in doc
        .descendants()
        .filter(|node| node.has_tag_name("SimpleField"))
    {
        let Some(name) = node_field.attribute("name") else {
            continue;
        };
        if schema.dict_type_by_name.contains_key(name) {
            continue;
        }
        let field_type = EnumKmlFieldType::from_label(node_field.attribute("type").unwrap_or(""));
        schema
            .dict_type_by_name
            .insert(name.to_string(), field_type);
        let mut field = SpecFieldDescriptor::new(name);
        field.display_name = child_text(node_field, "displayName")
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
            .map(str::to_string);
        schema.l_fields.push(field);
    }
    schema
}

fn collect_placemark_row(node_mark: Node<'_, '_>, schema: &SpecKmlSchema) -> Vec<(String, EnumLayerValue)> {
    let mut l_row = Vec::new();
    for tag in ["name", "description"] {
        if let Some(text) = child_text(node_mark, tag) {
            l_row.push((tag.to_string(), EnumKmlFieldType::Text.convert(text)));
        }
    }
    for node in node_mark.descendants() {
        if node.has_tag_name("Data")
            && let Some(name) = node.attribute("name")
        {
            let value = child_text(node, "value")
                .map_or(EnumLayerValue::Null, |text| EnumKmlFieldType::Text.convert(text));
            l_row.push((name.to_string(), value));
        } else if node.has_tag_name("SimpleData")
            && let Some(name) = node.attribute("name")
        {
            let field_type = schema
                .dict_type_by_name
                .get(name)
                .copied()
                .unwrap_or(EnumKmlFieldType::Text);
            l_row.push((name.to_string(), field_type.convert(node.text().unwrap_or(""))));
        }
    }
    l_row
}

fn check_coordinates(text: &str) -> Result<(), String> {
    let mut n_tuples = 0usize;
    for c_tuple in text.split_whitespace() {
        let l_parts: Vec<&str> = c_tuple.split(',').collect();
        if !(2..=3).contains(&l_parts.len()) {
            return Err(format!("coordinate tuple {c_tuple:?} has {} parts", l_parts.len()));
        }
        if l_parts.iter().any(|part| part.parse::<f64>().is_err()) {
            return Err(format!("coordinate tuple {c_tuple:?} is not numeric"));
        }
        n_tuples += 1;
    }
    if n_tuples == 0 {
        return Err("empty coordinates".to_string());
    }
    Ok(())
}

fn derive_geometry_kind(node_mark: Node<'_, '_>) -> Result<Option<String>, String> {
    let Some(node_geometry) = node_mark
        .children()
        .find(|child| TUP_KML_GEOMETRY_TAGS.iter().any(|tag| child.has_tag_name(*tag)))
    else {
        return Ok(None);
    };
    for node_coords in node_geometry
        .descendants()
        .filter(|node| node.has_tag_name("coordinates"))
    {
        check_coordinates(node_coords.text().unwrap_or(""))?;
    }
    Ok(Some(node_geometry.tag_name().name().to_string()))
}

pub(crate) fn read_kml_schema(
    path: &Path,
    options: &SpecReadOptions,
) -> Result<Vec<SpecFieldDescriptor>, LayerError> {
    let text = read_text(path, options.if_relaxed)?;
    let doc = parse_document(&text, options.if_relaxed)?;
    let schema = collect_schema(&doc);

    let mut l_fields: Vec<SpecFieldDescriptor> = Vec::new();
    for node_mark in doc.descendants().filter(|node| node.has_tag_name("Placemark")) {
        for (name, _) in collect_placemark_row(node_mark, &schema) {
            if !l_fields.iter().any(|field| field.name == name) {
                let field = schema
                    .l_fields
                    .iter()
                    .find(|field| field.name == name)
                    .cloned()
                    .unwrap_or_else(|| SpecFieldDescriptor::new(name));
                l_fields.push(field);
            }
        }
    }
    for field in schema.l_fields {
        if !l_fields.iter().any(|known| known.name == field.name) {
            l_fields.push(field);
        }
    }
    Ok(l_fields)
}

pub(crate) fn read_kml_rows(
    path: &Path,
    options: &SpecReadOptions,
) -> Result<SpecLayerFrame, LayerError> {
    let text = read_text(path, options.if_relaxed)?;
    let doc = parse_document(&text, options.if_relaxed)?;
    let schema = collect_schema(&doc);

    let mut builder = FrameBuilder::default();
    for (n_idx, node_mark) in doc
        .descendants()
        .filter(|node| node.has_tag_name("Placemark"))
        .enumerate()
    {
        if options.n_rows_max.is_some_and(|n_max| builder.n_rows() >= n_max) {
            break;
        }
        let mut l_row = collect_placemark_row(node_mark, &schema);
        if !options.if_skip_geometry {
            let value = match derive_geometry_kind(node_mark) {
                Ok(Some(c_kind)) => EnumLayerValue::Text(c_kind),
                Ok(None) => EnumLayerValue::Null,
                Err(_) if options.if_relaxed => EnumLayerValue::Null,
                Err(c_reason) => {
                    return Err(LayerError::malformed(
                        "KML geometry",
                        format!("placemark {n_idx}: {c_reason}"),
                    ));
                }
            };
            l_row.push((C_COLUMN_GEOMETRY.to_string(), value));
        }
        builder.push_row(l_row);
    }

    let frame = builder.finish()?;
    let fields = derive_field_descriptors(&frame, &schema.l_fields);
    Ok(SpecLayerFrame { frame, fields })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::derive_full_read_options;

    const C_DOC_SITES: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Schema name="sites" id="sites">
      <SimpleField name="code" type="int"><displayName>Site code</displayName></SimpleField>
      <SimpleField name="open" type="bool"/>
    </Schema>
    <Placemark>
      <name>东门</name>
      <ExtendedData>
        <SchemaData schemaUrl="#sites">
          <SimpleData name="code">7</SimpleData>
          <SimpleData name="open">1</SimpleData>
        </SchemaData>
        <Data name="note"><value>gate</value></Data>
      </ExtendedData>
      <Point><coordinates>116.4,39.9,0</coordinates></Point>
    </Placemark>
    <Placemark>
      <name>西门</name>
      <Point><coordinates>116.3,39.9</coordinates></Point>
    </Placemark>
  </Document>
</kml>"##;

    #[test]
    fn reads_placemarks_with_typed_schema_data_and_aliases() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("sites.kml");
        std::fs::write(&path, C_DOC_SITES).expect("write kml");

        let layer = read_kml_rows(&path, &derive_full_read_options()).expect("rows");
        assert_eq!(layer.frame.height(), 2);
        let l_names: Vec<&str> = layer.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(l_names, vec!["name", "code", "open", "note"]);
        let field_code = layer.fields.iter().find(|f| f.name == "code").expect("code");
        assert_eq!(field_code.header_text(true), "Site code");
        assert_eq!(
            layer.frame.column("code").expect("code").dtype(),
            &polars::prelude::DataType::Int64
        );

        let l_schema = read_kml_schema(&path, &derive_full_read_options()).expect("schema");
        assert_eq!(l_schema.len(), 4);
    }

    #[test]
    fn broken_coordinates_fail_only_with_geometry() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("bad.kml");
        std::fs::write(
            &path,
            r#"<kml><Placemark><name>a</name><Point><coordinates>x,y</coordinates></Point></Placemark></kml>"#,
        )
        .expect("write kml");

        assert!(read_kml_rows(&path, &derive_full_read_options()).is_err());
        let options = SpecReadOptions {
            if_skip_geometry: true,
            ..Default::default()
        };
        assert_eq!(read_kml_rows(&path, &options).expect("rows").frame.height(), 1);
    }

    #[test]
    fn foreign_root_is_rejected_in_strict_mode() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("other.kml");
        std::fs::write(&path, "<gpx><Placemark><name>a</name></Placemark></gpx>").expect("write");

        assert!(read_kml_schema(&path, &derive_full_read_options()).is_err());
        let options = SpecReadOptions {
            if_relaxed: true,
            ..Default::default()
        };
        assert_eq!(read_kml_schema(&path, &options).expect("relaxed").len(), 1);
    }
}
