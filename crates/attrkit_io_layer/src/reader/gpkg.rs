//! GeoPackage driver over `rusqlite`.
//!
//! Reads the first feature/attribute table listed in `gpkg_contents`. Field
//! aliases and coded-value domains come from the optional data-columns tables.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use crate::conf::{C_COLUMN_GEOMETRY, TUP_GPKG_APPLICATION_IDS};
use crate::spec::{EnumLayerValue, LayerError, SpecFieldDescriptor, SpecLayerFrame, SpecReadOptions};
use crate::util::{FrameBuilder, derive_field_descriptors};

const C_GPKG_MAGIC: &[u8; 2] = b"GP";

#[derive(Debug, Clone)]
struct SpecGpkgColumn {
    name: String,
    if_boolean: bool,
}

#[derive(Debug)]
struct SpecGpkgTable {
    name: String,
    c_geometry_column: Option<String>,
    l_columns: Vec<SpecGpkgColumn>,
    l_fields: Vec<SpecFieldDescriptor>,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn open_gpkg(path: &Path, options: &SpecReadOptions) -> Result<Connection, LayerError> {
    if !path.is_file() {
        return Err(LayerError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        ));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    if !options.if_relaxed {
        let n_app_id: i64 = conn.query_row("PRAGMA application_id", [], |row| row.get(0))?;
        if !TUP_GPKG_APPLICATION_IDS.contains(&n_app_id) {
            return Err(LayerError::malformed(
                "GeoPackage",
                format!("application_id {n_app_id:#x} is not a GeoPackage id"),
            ));
        }
    }
    Ok(conn)
}

fn has_table(conn: &Connection, name: &str) -> Result<bool, LayerError> {
    let n_count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(n_count > 0)
}

/// First listed layer; relaxed mode falls back to the first user table.
fn derive_table_name(conn: &Connection, if_relaxed: bool) -> Result<String, LayerError> {
    if has_table(conn, "gpkg_contents")? {
        let name: Option<String> = conn
            .query_row(
                "SELECT table_name FROM gpkg_contents \
                 WHERE data_type IN ('features', 'attributes') ORDER BY rowid LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(name) = name {
            return Ok(name);
        }
    } else if !if_relaxed {
        return Err(LayerError::malformed("GeoPackage", "gpkg_contents table is missing"));
    }

    if if_relaxed {
        let name: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'gpkg%' AND name NOT LIKE 'rtree%' \
                 AND name NOT LIKE 'sqlite%' ORDER BY rowid LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(name) = name {
            return Ok(name);
        }
    }
    Err(LayerError::malformed("GeoPackage", "no feature or attribute table"))
}

fn read_field_metadata(
    conn: &Connection,
    table: &str,
) -> Result<BTreeMap<String, (Option<String>, Option<String>)>, LayerError> {
    let mut dict_meta = BTreeMap::new();
    if !has_table(conn, "gpkg_data_columns")? {
        return Ok(dict_meta);
    }
    let mut stmt = conn.prepare(
        "SELECT column_name, COALESCE(NULLIF(title, ''), NULLIF(name, '')), constraint_name \
         FROM gpkg_data_columns WHERE table_name = ?1",
    )?;
    let rows = stmt.query_map(params![table], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;
    for row in rows {
        let (column, alias, constraint) = row?;
        dict_meta.insert(column, (alias, constraint));
    }
    Ok(dict_meta)
}

fn read_enum_domain(
    conn: &Connection,
    constraint: &str,
) -> Result<Option<BTreeMap<String, String>>, LayerError> {
    if !has_table(conn, "gpkg_data_column_constraints")? {
        return Ok(None);
    }
    let mut stmt = conn.prepare(
        "SELECT value, description FROM gpkg_data_column_constraints \
         WHERE constraint_name = ?1 AND constraint_type = 'enum'",
    )?;
    let rows = stmt.query_map(params![constraint], |row| {
        Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?))
    })?;
    let mut dict_domain = BTreeMap::new();
    for row in rows {
        if let (Some(code), Some(description)) = row? {
            dict_domain.insert(code, description);
        }
    }
    Ok((!dict_domain.is_empty()).then_some(dict_domain))
}

fn describe_table(conn: &Connection, if_relaxed: bool) -> Result<SpecGpkgTable, LayerError> {
    let name = derive_table_name(conn, if_relaxed)?;
    let c_geometry_column: Option<String> = if has_table(conn, "gpkg_geometry_columns")? {
        conn.query_row(
            "SELECT column_name FROM gpkg_geometry_columns WHERE table_name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?
    } else {
        None
    };

    let mut stmt = conn.prepare("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")?;
    let l_info: Vec<(String, String, i64)> = stmt
        .query_map(params![name], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<_, _>>()?;
    if l_info.is_empty() {
        return Err(LayerError::malformed(
            "GeoPackage",
            format!("table {name:?} has no columns"),
        ));
    }

    let n_pk = l_info.iter().filter(|(_, _, n_pk)| *n_pk > 0).count();
    let dict_meta = read_field_metadata(conn, &name)?;
    let mut l_columns = Vec::new();
    let mut l_fields = Vec::new();
    for (c_column, c_type, n_pk_pos) in l_info {
        let if_fid = n_pk == 1 && n_pk_pos == 1 && c_type.eq_ignore_ascii_case("INTEGER");
        if if_fid {
            continue;
        }
        if Some(&c_column) == c_geometry_column.as_ref() {
            continue;
        }
        let mut field = SpecFieldDescriptor::new(c_column.clone());
        if let Some((alias, constraint)) = dict_meta.get(&c_column) {
            field.display_name = alias.clone();
            if let Some(constraint) = constraint {
                field.domain = read_enum_domain(conn, constraint)?;
            }
        }
        l_fields.push(field);
        l_columns.push(SpecGpkgColumn {
            name: c_column,
            if_boolean: c_type.eq_ignore_ascii_case("BOOLEAN"),
        });
    }

    Ok(SpecGpkgTable {
        name,
        c_geometry_column,
        l_columns,
        l_fields,
    })
}

fn derive_envelope_len(n_flags: u8) -> Option<usize> {
    match (n_flags >> 1) & 0x07 {
        0 => Some(0),
        1 => Some(32),
        2 | 3 => Some(48),
        4 => Some(64),
        _ => None,
    }
}

/// Geometry type of a GeoPackage binary blob (`GP` header + WKB).
fn derive_geometry_kind(v_blob: &[u8]) -> Result<Option<&'static str>, String> {
    if v_blob.len() < 8 || &v_blob[..2] != C_GPKG_MAGIC {
        return Err("missing GeoPackage geometry magic".to_string());
    }
    let n_flags = v_blob[3];
    let n_len_envelope =
        derive_envelope_len(n_flags).ok_or_else(|| format!("invalid envelope flags {n_flags:#x}"))?;
    if n_flags & 0x10 != 0 {
        return Ok(None);
    }
    let v_wkb = v_blob
        .get(8 + n_len_envelope..)
        .filter(|v_wkb| v_wkb.len() >= 5)
        .ok_or_else(|| "geometry blob is truncated".to_string())?;
    let v_type = [v_wkb[1], v_wkb[2], v_wkb[3], v_wkb[4]];
    let n_wkb_type = match v_wkb[0] {
        0 => u32::from_be_bytes(v_type),
        1 => u32::from_le_bytes(v_type),
        n_order => return Err(format!("invalid WKB byte order {n_order}")),
    };
    let c_kind = match n_wkb_type % 1000 {
        1 => "Point",
        2 => "LineString",
        3 => "Polygon",
        4 => "MultiPoint",
        5 => "MultiLineString",
        6 => "MultiPolygon",
        7 => "GeometryCollection",
        _ => return Err(format!("unknown WKB type {n_wkb_type}")),
    };
    Ok(Some(c_kind))
}

fn convert_sql_value(
    value: ValueRef<'_>,
    column: &SpecGpkgColumn,
    if_relaxed: bool,
) -> Result<EnumLayerValue, LayerError> {
    Ok(match value {
        ValueRef::Null | ValueRef::Blob(_) => EnumLayerValue::Null,
        ValueRef::Integer(val) if column.if_boolean => EnumLayerValue::Boolean(val != 0),
        ValueRef::Integer(val) => EnumLayerValue::Integer(val),
        ValueRef::Real(val) => EnumLayerValue::Float(val),
        ValueRef::Text(v_bytes) if if_relaxed => {
            EnumLayerValue::Text(String::from_utf8_lossy(v_bytes).into_owned())
        }
        ValueRef::Text(v_bytes) => match std::str::from_utf8(v_bytes) {
            Ok(text) => EnumLayerValue::Text(text.to_string()),
            Err(err) => {
                return Err(LayerError::malformed(
                    format!("GeoPackage column {:?}", column.name),
                    err.to_string(),
                ));
            }
        },
    })
}

pub(crate) fn read_gpkg_schema(
    path: &Path,
    options: &SpecReadOptions,
) -> Result<Vec<SpecFieldDescriptor>, LayerError> {
    let conn = open_gpkg(path, options)?;
    Ok(describe_table(&conn, options.if_relaxed)?.l_fields)
}

pub(crate) fn read_gpkg_rows(
    path: &Path,
    options: &SpecReadOptions,
) -> Result<SpecLayerFrame, LayerError> {
    let conn = open_gpkg(path, options)?;
    let table = describe_table(&conn, options.if_relaxed)?;

    let mut l_select: Vec<String> = table
        .l_columns
        .iter()
        .map(|column| quote_ident(&column.name))
        .collect();
    let c_geometry_select = table
        .c_geometry_column
        .as_ref()
        .filter(|_| !options.if_skip_geometry);
    if let Some(c_geometry) = c_geometry_select {
        l_select.push(quote_ident(c_geometry));
    }
    if l_select.is_empty() {
        l_select.push("NULL".to_string());
    }
    let mut c_sql = format!("SELECT {} FROM {}", l_select.join(", "), quote_ident(&table.name));
    if let Some(n_max) = options.n_rows_max {
        c_sql.push_str(&format!(" LIMIT {n_max}"));
    }

    let mut builder = FrameBuilder::with_columns(table.l_columns.iter().map(|c| c.name.clone()));
    let mut stmt = conn.prepare(&c_sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut l_row = Vec::with_capacity(table.l_columns.len() + 1);
        for (n_idx, column) in table.l_columns.iter().enumerate() {
            l_row.push((
                column.name.clone(),
                convert_sql_value(row.get_ref(n_idx)?, column, options.if_relaxed)?,
            ));
        }
        if c_geometry_select.is_some() {
            let value = match row.get_ref(table.l_columns.len())? {
                ValueRef::Null => EnumLayerValue::Null,
                ValueRef::Blob(v_blob) => match derive_geometry_kind(v_blob) {
                    Ok(kind) => kind.map_or(EnumLayerValue::Null, |c_kind| {
                        EnumLayerValue::Text(c_kind.to_string())
                    }),
                    Err(_) if options.if_relaxed => EnumLayerValue::Null,
                    Err(c_reason) => {
                        return Err(LayerError::malformed("GeoPackage geometry", c_reason));
                    }
                },
                _ if options.if_relaxed => EnumLayerValue::Null,
                _ => {
                    return Err(LayerError::malformed(
                        "GeoPackage geometry",
                        "geometry value is not a blob",
                    ));
                }
            };
            l_row.push((C_COLUMN_GEOMETRY.to_string(), value));
        }
        builder.push_row(l_row);
    }

    let frame = builder.finish()?;
    let fields = derive_field_descriptors(&frame, &table.l_fields);
    Ok(SpecLayerFrame { frame, fields })
}
