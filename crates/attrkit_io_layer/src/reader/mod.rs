//! Format drivers behind one reader seam.

pub(crate) mod dbf;
pub(crate) mod geojson;
pub(crate) mod gpkg;
pub(crate) mod kml;
pub(crate) mod shapefile;

use crate::spec::{
    EnumLayerFormat, LayerError, SpecFieldDescriptor, SpecLayerFrame, SpecLayerSource,
    SpecReadOptions,
};

/// Reads vector layers into tabular form.
///
/// Probe and load strategies call this seam with different options; a
/// different implementation can be injected for other backends or tests.
pub trait LayerReader: Send + Sync {
    /// Attribute schema without materializing rows.
    fn read_schema(
        &self,
        source: &SpecLayerSource,
        options: &SpecReadOptions,
    ) -> Result<Vec<SpecFieldDescriptor>, LayerError>;

    /// Rows (possibly limited) plus field metadata.
    fn read_rows(
        &self,
        source: &SpecLayerSource,
        options: &SpecReadOptions,
    ) -> Result<SpecLayerFrame, LayerError>;
}

/// Built-in drivers, dispatched on [`EnumLayerFormat`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLayerReader;

impl LayerReader for NativeLayerReader {
    fn read_schema(
        &self,
        source: &SpecLayerSource,
        options: &SpecReadOptions,
    ) -> Result<Vec<SpecFieldDescriptor>, LayerError> {
        let path = source.path.as_path();
        match source.format {
            EnumLayerFormat::Shapefile => shapefile::read_shapefile_schema(path, options),
            EnumLayerFormat::Dbf => dbf::read_dbf_fields(path, options),
            EnumLayerFormat::GeoPackage => gpkg::read_gpkg_schema(path, options),
            EnumLayerFormat::GeoJson => geojson::read_geojson_schema(path, options),
            EnumLayerFormat::Kml => kml::read_kml_schema(path, options),
            EnumLayerFormat::Unknown => Err(LayerError::UnsupportedFormat(
                path.extension()
                    .map(|ext| ext.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )),
        }
    }

    fn read_rows(
        &self,
        source: &SpecLayerSource,
        options: &SpecReadOptions,
    ) -> Result<SpecLayerFrame, LayerError> {
        let path = source.path.as_path();
        match source.format {
            EnumLayerFormat::Shapefile => shapefile::read_shapefile_rows(path, options),
            EnumLayerFormat::Dbf => {
                let frame = dbf::read_dbf_table(path, options)?
                    .into_frame_builder(|_| Vec::new())
                    .finish()?;
                let fields = crate::util::derive_field_descriptors(&frame, &[]);
                Ok(SpecLayerFrame { frame, fields })
            }
            EnumLayerFormat::GeoPackage => gpkg::read_gpkg_rows(path, options),
            EnumLayerFormat::GeoJson => geojson::read_geojson_rows(path, options),
            EnumLayerFormat::Kml => kml::read_kml_rows(path, options),
            EnumLayerFormat::Unknown => Err(LayerError::UnsupportedFormat(
                path.extension()
                    .map(|ext| ext.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            )),
        }
    }
}
