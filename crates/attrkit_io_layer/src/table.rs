use polars::prelude::DataFrame;

use crate::conf::C_COLUMN_GEOMETRY;
use crate::spec::{SpecFieldDescriptor, SpecLayerFrame};
use crate::util::derive_field_descriptors;

/// Loaded attribute table: unique column names, no geometry column.
#[derive(Debug, Clone)]
pub struct AttributeTable {
    frame: DataFrame,
    fields: Vec<SpecFieldDescriptor>,
}

impl AttributeTable {
    /// Strip geometry from a reader frame and align field metadata with columns.
    pub fn from_layer_frame(layer: SpecLayerFrame) -> Self {
        let SpecLayerFrame { mut frame, fields } = layer;
        if frame.column(C_COLUMN_GEOMETRY).is_ok() {
            frame = frame.drop(C_COLUMN_GEOMETRY).unwrap_or(frame);
        }
        let fields = derive_field_descriptors(&frame, &fields);
        Self { frame, fields }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.frame.get_column_names_str()
    }

    pub fn n_rows(&self) -> usize {
        self.frame.height()
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn fields(&self) -> &[SpecFieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&SpecFieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[cfg(test)]
mod tests {
    use polars::prelude::Column;

    use super::*;

    #[test]
    fn geometry_is_stripped() {
        let frame = DataFrame::new(vec![
            Column::new("a".into(), vec![1i64, 2]),
            Column::new(C_COLUMN_GEOMETRY.into(), vec!["Point", "Point"]),
            Column::new("b".into(), vec!["x", "y"]),
        ])
        .expect("frame");
        let mut field_b = SpecFieldDescriptor::new("b");
        field_b.display_name = Some("Bee".to_string());

        let table = AttributeTable::from_layer_frame(SpecLayerFrame {
            frame,
            fields: vec![SpecFieldDescriptor::new("a"), field_b],
        });

        assert_eq!(table.column_names(), vec!["a", "b"]);
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.field("b").map(|f| f.header_text(true)), Some("Bee"));
        assert!(table.field(C_COLUMN_GEOMETRY).is_none());
    }
}
