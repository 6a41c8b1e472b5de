//! Data loaders for PCD, PLY and CSV point cloud files.
//!
//! This module provides parsers for:
//! - PCD v0.7 files (`DATA ascii` and `DATA binary`) as written by PCL
//! - ASCII PLY point cloud files (with optional intensity)
//! - Cartesian point cloud CSV files (x, y, z columns, optional intensity)
//!
//! It also owns the [`PointCloud`] container shared by every pipeline stage.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use regex::Regex;
use thiserror::Error;

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("Invalid PCD file: {0}")]
    InvalidPcd(String),

    #[error("Invalid PLY file: {0}")]
    InvalidPly(String),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported point cloud format: {0}")]
    UnsupportedFormat(PathBuf),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// File extensions recognised by [`load_cloud`] and [`list_frames`].
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pcd", "ply", "csv"];

/// A single point: position plus optional return intensity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: Option<f32>,
}

impl Point {
    /// Creates a point without intensity.
    #[inline]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            intensity: None,
        }
    }

    /// Returns the position as an `[x, y, z]` array.
    #[inline]
    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Container for 3D point cloud data.
///
/// Coordinates are stored as separate columns. The point's position in the
/// columns is its identity: clusters and plane partitions refer to points by
/// index into the cloud they were computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    /// X coordinates of all points.
    pub x: Vec<f32>,
    /// Y coordinates of all points.
    pub y: Vec<f32>,
    /// Z coordinates of all points.
    pub z: Vec<f32>,
    /// Optional return intensity for each point.
    pub intensity: Option<Vec<f32>>,
}

impl PointCloud {
    /// Creates a new empty point cloud.
    pub fn new() -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
            intensity: None,
        }
    }

    /// Creates a point cloud from `[x, y, z]` positions.
    pub fn from_positions(positions: &[[f32; 3]]) -> Self {
        let mut cloud = Self::with_capacity(positions.len());
        for p in positions {
            cloud.push(p[0], p[1], p[2]);
        }
        cloud
    }

    /// Creates a new point cloud with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            intensity: None,
        }
    }

    /// Returns the number of points in the cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Returns true if the cloud carries an intensity column.
    #[inline]
    pub fn has_intensity(&self) -> bool {
        self.intensity.is_some()
    }

    /// Position of point `i`.
    #[inline]
    pub fn position(&self, i: usize) -> [f32; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    /// Point `i` including its intensity, if any.
    #[inline]
    pub fn point(&self, i: usize) -> Point {
        Point {
            x: self.x[i],
            y: self.y[i],
            z: self.z[i],
            intensity: self.intensity.as_ref().map(|v| v[i]),
        }
    }

    /// Iterates over all points in index order.
    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        (0..self.len()).map(move |i| self.point(i))
    }

    /// Converts point cloud to a vector of [x, y, z] coordinate arrays.
    pub fn to_coords(&self) -> Vec<[f32; 3]> {
        let n = self.len();
        let mut coords = Vec::with_capacity(n);
        for i in 0..n {
            coords.push([self.x[i], self.y[i], self.z[i]]);
        }
        coords
    }

    /// Adds a point to the cloud.
    ///
    /// If the cloud carries intensity, the new point gets an intensity of 0.
    #[inline]
    pub fn push(&mut self, x: f32, y: f32, z: f32) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
        if let Some(ref mut intensity) = self.intensity {
            intensity.push(0.0);
        }
    }

    /// Adds a point with intensity to the cloud.
    ///
    /// The first call on a cloud without intensity back-fills zeros for the
    /// points already present.
    pub fn push_with_intensity(&mut self, x: f32, y: f32, z: f32, value: f32) {
        if self.intensity.is_none() {
            let mut column = Vec::with_capacity(self.x.capacity());
            column.resize(self.x.len(), 0.0);
            self.intensity = Some(column);
        }

        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
        if let Some(ref mut column) = self.intensity {
            column.push(value);
        }
    }

    /// Adds a [`Point`], keeping its intensity when present.
    pub fn push_point(&mut self, point: Point) {
        match point.intensity {
            Some(value) => self.push_with_intensity(point.x, point.y, point.z, value),
            None => self.push(point.x, point.y, point.z),
        }
    }
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Point> for PointCloud {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        let mut cloud = PointCloud::new();
        for point in iter {
            cloud.push_point(point);
        }
        cloud
    }
}

/// Load a point cloud, choosing the parser from the file extension.
///
/// # Errors
///
/// Returns [`LoaderError::UnsupportedFormat`] for unknown extensions, or the
/// parser's error for malformed files.
pub fn load_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("pcd") => load_pcd(path),
        Some("ply") => load_ply(path),
        Some("csv") => load_csv(path),
        _ => Err(LoaderError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Storage layout of the PCD point records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PcdData {
    Ascii,
    Binary,
}

/// Parsed PCD header.
#[derive(Debug)]
struct PcdHeader {
    fields: Vec<String>,
    sizes: Vec<usize>,
    types: Vec<char>,
    counts: Vec<usize>,
    points: usize,
    data: PcdData,
}

impl PcdHeader {
    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.eq_ignore_ascii_case(name))
    }
}

/// Load a point cloud from a PCD file.
///
/// Supports the `ascii` and `binary` data sections. Fields `x`, `y`, `z` are
/// required; `intensity` is read when present. Other fields are skipped.
///
/// # Errors
///
/// Returns an error if the header is malformed, required fields are missing,
/// the data section is truncated, or the data is `binary_compressed`.
pub fn load_pcd<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }
    parse_pcd(&bytes)
}

/// Parse the contents of a PCD file already held in memory.
pub fn parse_pcd(bytes: &[u8]) -> Result<PointCloud> {
    let (header, data_offset) = parse_pcd_header(bytes)?;

    let x_idx = header
        .field_index("x")
        .ok_or_else(|| LoaderError::MissingColumns("x".to_string()))?;
    let y_idx = header
        .field_index("y")
        .ok_or_else(|| LoaderError::MissingColumns("y".to_string()))?;
    let z_idx = header
        .field_index("z")
        .ok_or_else(|| LoaderError::MissingColumns("z".to_string()))?;
    let i_idx = header.field_index("intensity");

    let body = &bytes[data_offset..];
    match header.data {
        PcdData::Ascii => parse_pcd_ascii(&header, body, [x_idx, y_idx, z_idx], i_idx),
        PcdData::Binary => parse_pcd_binary(&header, body, [x_idx, y_idx, z_idx], i_idx),
    }
}

fn parse_pcd_header(bytes: &[u8]) -> Result<(PcdHeader, usize)> {
    let mut fields: Vec<String> = Vec::new();
    let mut sizes: Option<Vec<usize>> = None;
    let mut types: Option<Vec<char>> = None;
    let mut counts: Option<Vec<usize>> = None;
    let mut width: Option<usize> = None;
    let mut height: Option<usize> = None;
    let mut points: Option<usize> = None;

    let mut offset = 0;
    while offset < bytes.len() {
        let end = bytes[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |p| offset + p);
        let line = std::str::from_utf8(&bytes[offset..end])
            .map_err(|_| LoaderError::InvalidPcd("header is not valid UTF-8".to_string()))?
            .trim();
        offset = (end + 1).min(bytes.len());

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let key = parts.next().unwrap_or_default().to_ascii_uppercase();
        let values: Vec<&str> = parts.collect();

        match key.as_str() {
            "FIELDS" | "COLUMNS" => {
                fields = values.iter().map(|s| s.to_string()).collect();
            }
            "SIZE" => sizes = Some(parse_usize_list(&values, "SIZE")?),
            "TYPE" => {
                types = Some(
                    values
                        .iter()
                        .map(|s| s.chars().next().unwrap_or('F').to_ascii_uppercase())
                        .collect(),
                );
            }
            "COUNT" => counts = Some(parse_usize_list(&values, "COUNT")?),
            "WIDTH" => width = Some(parse_usize_one(&values, "WIDTH")?),
            "HEIGHT" => height = Some(parse_usize_one(&values, "HEIGHT")?),
            "POINTS" => points = Some(parse_usize_one(&values, "POINTS")?),
            "DATA" => {
                let data = match values.first().map(|s| s.to_ascii_lowercase()).as_deref() {
                    Some("ascii") => PcdData::Ascii,
                    Some("binary") => PcdData::Binary,
                    Some("binary_compressed") => {
                        return Err(LoaderError::InvalidPcd(
                            "binary_compressed data is not supported".to_string(),
                        ))
                    }
                    other => {
                        return Err(LoaderError::InvalidPcd(format!(
                            "unknown DATA type: {}",
                            other.unwrap_or("<missing>")
                        )))
                    }
                };

                if fields.is_empty() {
                    return Err(LoaderError::InvalidPcd("no FIELDS in header".to_string()));
                }
                let n = fields.len();
                let sizes = sizes.unwrap_or_else(|| vec![4; n]);
                let types = types.unwrap_or_else(|| vec!['F'; n]);
                let counts = counts.unwrap_or_else(|| vec![1; n]);
                if sizes.len() != n || types.len() != n || counts.len() != n {
                    return Err(LoaderError::InvalidPcd(format!(
                        "FIELDS/SIZE/TYPE/COUNT length mismatch ({} fields)",
                        n
                    )));
                }

                let points = match (points, width, height) {
                    (Some(p), _, _) => p,
                    (None, Some(w), Some(h)) => w.checked_mul(h).ok_or_else(|| {
                        LoaderError::InvalidPcd(format!("WIDTH {} x HEIGHT {} overflows", w, h))
                    })?,
                    (None, Some(w), None) => w,
                    _ => {
                        return Err(LoaderError::InvalidPcd(
                            "no POINTS or WIDTH in header".to_string(),
                        ))
                    }
                };

                let header = PcdHeader {
                    fields,
                    sizes,
                    types,
                    counts,
                    points,
                    data,
                };
                return Ok((header, offset));
            }
            // VERSION, VIEWPOINT and unknown keys carry nothing we need.
            _ => {}
        }
    }

    Err(LoaderError::InvalidPcd("missing DATA line".to_string()))
}

fn parse_usize_list(values: &[&str], key: &str) -> Result<Vec<usize>> {
    values
        .iter()
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| LoaderError::InvalidPcd(format!("invalid {} value: {}", key, s)))
        })
        .collect()
}

fn parse_usize_one(values: &[&str], key: &str) -> Result<usize> {
    let first = values
        .first()
        .ok_or_else(|| LoaderError::InvalidPcd(format!("missing {} value", key)))?;
    first
        .parse::<usize>()
        .map_err(|_| LoaderError::InvalidPcd(format!("invalid {} value: {}", key, first)))
}

fn parse_pcd_ascii(
    header: &PcdHeader,
    body: &[u8],
    xyz: [usize; 3],
    intensity_idx: Option<usize>,
) -> Result<PointCloud> {
    // Token offset of each field within a record.
    let mut token_offsets = Vec::with_capacity(header.fields.len());
    let mut acc = 0;
    for &count in &header.counts {
        token_offsets.push(acc);
        acc += count;
    }
    let tokens_per_point = acc;

    let text = String::from_utf8_lossy(body);
    // A record takes at least two bytes, so the body bounds the point count.
    let capacity = header.points.min(body.len() / 2);
    let mut cloud = PointCloud::with_capacity(capacity);
    let mut intensity = intensity_idx.map(|_| Vec::with_capacity(capacity));

    let parse_token = |values: &[&str], field: usize, name: &str| -> Result<f32> {
        let token = values[token_offsets[field]];
        token
            .parse::<f32>()
            .map_err(|_| LoaderError::ParseError(format!("Invalid {} value: {}", name, token)))
    };

    let mut vertex_count = 0;
    for line in text.lines() {
        if vertex_count >= header.points {
            break;
        }
        let values: Vec<&str> = line.split_whitespace().collect();
        if values.is_empty() {
            continue;
        }
        if values.len() < tokens_per_point {
            return Err(LoaderError::InvalidPcd(format!(
                "record {} has {} values, expected {}",
                vertex_count,
                values.len(),
                tokens_per_point
            )));
        }

        let x = parse_token(&values, xyz[0], "x")?;
        let y = parse_token(&values, xyz[1], "y")?;
        let z = parse_token(&values, xyz[2], "z")?;
        cloud.push(x, y, z);

        if let (Some(idx), Some(column)) = (intensity_idx, intensity.as_mut()) {
            column.push(parse_token(&values, idx, "intensity")?);
        }

        vertex_count += 1;
    }

    if vertex_count < header.points {
        return Err(LoaderError::InvalidPcd(format!(
            "Expected {} points, found {}",
            header.points, vertex_count
        )));
    }

    cloud.intensity = intensity;
    Ok(cloud)
}

fn parse_pcd_binary(
    header: &PcdHeader,
    body: &[u8],
    xyz: [usize; 3],
    intensity_idx: Option<usize>,
) -> Result<PointCloud> {
    let mut byte_offsets = Vec::with_capacity(header.fields.len());
    let overflow = || LoaderError::InvalidPcd("binary record size overflows".to_string());
    let mut point_step: usize = 0;
    for (size, count) in header.sizes.iter().zip(&header.counts) {
        byte_offsets.push(point_step);
        let field_bytes = size.checked_mul(*count).ok_or_else(overflow)?;
        point_step = point_step.checked_add(field_bytes).ok_or_else(overflow)?;
    }

    let needed = point_step.checked_mul(header.points).ok_or_else(overflow)?;
    if body.len() < needed {
        return Err(LoaderError::InvalidPcd(format!(
            "binary data truncated: expected {} bytes, found {}",
            needed,
            body.len()
        )));
    }

    let read_field = |record: &[u8], field: usize| -> Result<f32> {
        let start = byte_offsets[field];
        let size = header.sizes[field];
        read_scalar(&record[start..start + size], header.types[field])
    };

    let capacity = header.points.min(body.len() / point_step.max(1));
    let mut cloud = PointCloud::with_capacity(capacity);
    let mut intensity = intensity_idx.map(|_| Vec::with_capacity(capacity));

    for record in body[..needed].chunks_exact(point_step.max(1)) {
        let x = read_field(record, xyz[0])?;
        let y = read_field(record, xyz[1])?;
        let z = read_field(record, xyz[2])?;
        cloud.push(x, y, z);

        if let (Some(idx), Some(column)) = (intensity_idx, intensity.as_mut()) {
            column.push(read_field(record, idx)?);
        }
    }

    cloud.intensity = intensity;
    Ok(cloud)
}

/// Decode one little-endian PCD scalar into `f32`.
fn read_scalar(bytes: &[u8], ty: char) -> Result<f32> {
    let value = match (ty, bytes.len()) {
        ('F', 4) => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        ('F', 8) => f64::from_le_bytes(to_array8(bytes)) as f32,
        ('U', 1) => bytes[0] as f32,
        ('U', 2) => u16::from_le_bytes([bytes[0], bytes[1]]) as f32,
        ('U', 4) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
        ('U', 8) => u64::from_le_bytes(to_array8(bytes)) as f32,
        ('I', 1) => bytes[0] as i8 as f32,
        ('I', 2) => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
        ('I', 4) => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
        ('I', 8) => i64::from_le_bytes(to_array8(bytes)) as f32,
        (ty, size) => {
            return Err(LoaderError::InvalidPcd(format!(
                "unsupported field type {} with size {}",
                ty, size
            )))
        }
    };
    Ok(value)
}

fn to_array8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

/// Load a Cartesian point cloud from a CSV file with x, y, z columns.
///
/// Column names are matched case-insensitively. An `intensity` column is read
/// when present.
///
/// # Errors
///
/// Returns an error if the file cannot be read, lacks x/y/z columns, contains
/// non-numeric coordinates, or has no rows.
pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    // Get headers and map to lowercase
    let headers = reader.headers()?.clone();
    let col_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim().to_lowercase(), i))
        .collect();

    let column = |name: &str| {
        col_map
            .get(name)
            .copied()
            .ok_or_else(|| LoaderError::MissingColumns(name.to_string()))
    };
    let x_idx = column("x")?;
    let y_idx = column("y")?;
    let z_idx = column("z")?;
    let i_idx = col_map.get("intensity").copied();

    let mut cloud = PointCloud::with_capacity(10000);
    let mut intensity = i_idx.map(|_| Vec::with_capacity(10000));

    for (row, result) in reader.records().enumerate() {
        let record = result?;
        let parse = |idx: usize, name: &str| -> Result<f32> {
            let raw = record.get(idx).unwrap_or_default().trim();
            raw.parse::<f32>().map_err(|_| {
                LoaderError::ParseError(format!("row {}: invalid {} value: {:?}", row + 1, name, raw))
            })
        };

        cloud.push(parse(x_idx, "x")?, parse(y_idx, "y")?, parse(z_idx, "z")?);
        if let (Some(idx), Some(column)) = (i_idx, intensity.as_mut()) {
            column.push(parse(idx, "intensity")?);
        }
    }

    if cloud.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    cloud.intensity = intensity;
    Ok(cloud)
}

/// Load a point cloud from an ASCII PLY file.
///
/// Supports PLY files with vertex elements containing:
/// - Required: x, y, z properties
/// - Optional: intensity property
///
/// # Errors
///
/// Returns an error if the file is not a valid ASCII PLY or lacks required properties.
pub fn load_ply<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let file_len = usize::try_from(file.metadata()?.len()).unwrap_or(usize::MAX);
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    // Check PLY magic number
    let first_line = lines
        .next()
        .ok_or_else(|| LoaderError::InvalidPly("Empty file".to_string()))??;

    if !first_line.trim().starts_with("ply") {
        return Err(LoaderError::InvalidPly(format!(
            "{} is not a PLY file",
            path.display()
        )));
    }

    // Parse header
    let mut num_vertices: Option<usize> = None;
    let mut prop_names: Vec<String> = Vec::new();
    let mut in_vertex_element = false;
    let mut header_done = false;

    for line in &mut lines {
        let line = line?;
        let stripped = line.trim();

        if stripped.starts_with("format") {
            if !stripped.contains("ascii") {
                return Err(LoaderError::InvalidPly(format!(
                    "only ASCII PLY is supported, got '{}'",
                    stripped
                )));
            }
        } else if stripped.starts_with("element") {
            in_vertex_element = stripped.starts_with("element vertex");
            if in_vertex_element {
                let parts: Vec<&str> = stripped.split_whitespace().collect();
                if let Some(count_str) = parts.last() {
                    num_vertices = count_str.parse().ok();
                }
            }
        } else if stripped.starts_with("property") && in_vertex_element {
            let parts: Vec<&str> = stripped.split_whitespace().collect();
            if let Some(name) = parts.last() {
                prop_names.push(name.to_string());
            }
        } else if stripped == "end_header" {
            header_done = true;
            break;
        }
    }

    if !header_done {
        return Err(LoaderError::InvalidPly("Missing end_header".to_string()));
    }

    let num_vertices = num_vertices
        .ok_or_else(|| LoaderError::InvalidPly("No vertex count in header".to_string()))?;

    // Build property index map
    let prop_idx: HashMap<&str, usize> = prop_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    // Verify required properties
    let x_idx = prop_idx
        .get("x")
        .copied()
        .ok_or_else(|| LoaderError::MissingColumns("x".to_string()))?;
    let y_idx = prop_idx
        .get("y")
        .copied()
        .ok_or_else(|| LoaderError::MissingColumns("y".to_string()))?;
    let z_idx = prop_idx
        .get("z")
        .copied()
        .ok_or_else(|| LoaderError::MissingColumns("z".to_string()))?;
    let i_idx = prop_idx.get("intensity").copied();

    // Each vertex line takes at least two bytes of the file.
    let capacity = num_vertices.min(file_len / 2);
    let mut cloud = PointCloud::with_capacity(capacity);
    let mut intensity = i_idx.map(|_| Vec::with_capacity(capacity));

    let parse = |values: &[&str], idx: usize, name: &str| -> Result<f32> {
        values[idx]
            .parse()
            .map_err(|_| LoaderError::ParseError(format!("Invalid {} value: {}", name, values[idx])))
    };

    // Parse vertex data
    let mut vertex_count = 0;
    for line in lines {
        if vertex_count >= num_vertices {
            break;
        }

        let line = line?;
        let values: Vec<&str> = line.split_whitespace().collect();

        if values.len() < prop_names.len() {
            continue;
        }

        cloud.push(
            parse(&values, x_idx, "x")?,
            parse(&values, y_idx, "y")?,
            parse(&values, z_idx, "z")?,
        );
        if let (Some(idx), Some(column)) = (i_idx, intensity.as_mut()) {
            column.push(parse(&values, idx, "intensity")?);
        }

        vertex_count += 1;
    }

    if vertex_count < num_vertices {
        return Err(LoaderError::InvalidPly(format!(
            "Expected {} vertices, found {}",
            num_vertices, vertex_count
        )));
    }

    cloud.intensity = intensity;
    Ok(cloud)
}

/// List the point cloud files of a directory in frame order.
///
/// Frames are ordered by the last run of digits in the file stem
/// (`0000000012.pcd` before `0000000100.pcd`); files without a number come
/// last, ordered by name.
pub fn list_frames<P: AsRef<Path>>(directory: P) -> Result<Vec<PathBuf>> {
    let frame_pattern = Regex::new(r"(\d+)\D*$")
        .map_err(|e| LoaderError::ParseError(format!("frame pattern: {}", e)))?;

    let mut frames: Vec<(Option<u64>, PathBuf)> = fs::read_dir(directory.as_ref())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| {
                    SUPPORTED_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                })
                .unwrap_or(false)
        })
        .map(|path| {
            let frame = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|stem| frame_pattern.captures(stem))
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok());
            (frame, path)
        })
        .collect();

    frames.sort_by(|(fa, pa), (fb, pb)| match (fa, fb) {
        (Some(a), Some(b)) => a.cmp(b).then_with(|| pa.cmp(pb)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => pa.cmp(pb),
    });

    Ok(frames.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_point_cloud_operations() {
        let mut cloud = PointCloud::new();
        assert!(cloud.is_empty());
        assert_eq!(cloud.len(), 0);

        cloud.push(1.0, 2.0, 3.0);
        cloud.push(4.0, 5.0, 6.0);

        assert_eq!(cloud.len(), 2);
        assert!(!cloud.is_empty());

        let coords = cloud.to_coords();
        assert_eq!(coords.len(), 2);
        assert_eq!(coords[0], [1.0, 2.0, 3.0]);
        assert_eq!(coords[1], [4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_push_with_intensity_backfills() {
        let mut cloud = PointCloud::new();
        cloud.push(1.0, 2.0, 3.0);
        cloud.push_with_intensity(4.0, 5.0, 6.0, 0.8);
        cloud.push(7.0, 8.0, 9.0);

        let intensity = cloud.intensity.as_ref().unwrap();
        assert_eq!(intensity, &vec![0.0, 0.8, 0.0]);
        assert_eq!(cloud.point(1).intensity, Some(0.8));
        assert_eq!(cloud.point(1).position(), [4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_collect_points() {
        let cloud: PointCloud = vec![Point::new(1.0, 0.0, 0.0), Point::new(0.0, 1.0, 0.0)]
            .into_iter()
            .collect();
        assert_eq!(cloud.len(), 2);
        assert!(!cloud.has_intensity());
    }

    #[test]
    fn test_load_csv() -> Result<()> {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "X,Y,Z,intensity").unwrap();
        writeln!(file, "1.0,2.0,3.0,0.5").unwrap();
        writeln!(file, "4.0,5.0,6.0,0.25").unwrap();
        file.flush().unwrap();

        let cloud = load_csv(file.path())?;
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.x[0], 1.0);
        assert_eq!(cloud.y[0], 2.0);
        assert_eq!(cloud.z[0], 3.0);
        assert_eq!(cloud.intensity, Some(vec![0.5, 0.25]));

        Ok(())
    }

    #[test]
    fn test_load_csv_rejects_garbage() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "x,y,z").unwrap();
        writeln!(file, "1.0,abc,3.0").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            load_csv(file.path()),
            Err(LoaderError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_csv_missing_columns() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "a,b").unwrap();
        writeln!(file, "1.0,2.0").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            load_csv(file.path()),
            Err(LoaderError::MissingColumns(_))
        ));
    }

    #[test]
    fn test_load_ply() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ply").unwrap();
        writeln!(file, "format ascii 1.0").unwrap();
        writeln!(file, "element vertex 2").unwrap();
        writeln!(file, "property float x").unwrap();
        writeln!(file, "property float y").unwrap();
        writeln!(file, "property float z").unwrap();
        writeln!(file, "property float intensity").unwrap();
        writeln!(file, "end_header").unwrap();
        writeln!(file, "1.0 2.0 3.0 0.1").unwrap();
        writeln!(file, "4.0 5.0 6.0 0.9").unwrap();
        file.flush().unwrap();

        let cloud = load_ply(file.path())?;
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.x[0], 1.0);
        assert_eq!(cloud.y[1], 5.0);
        assert_eq!(cloud.intensity, Some(vec![0.1, 0.9]));

        Ok(())
    }

    #[test]
    fn test_load_ply_truncated() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ply").unwrap();
        writeln!(file, "format ascii 1.0").unwrap();
        writeln!(file, "element vertex 3").unwrap();
        writeln!(file, "property float x").unwrap();
        writeln!(file, "property float y").unwrap();
        writeln!(file, "property float z").unwrap();
        writeln!(file, "end_header").unwrap();
        writeln!(file, "1.0 2.0 3.0").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            load_ply(file.path()),
            Err(LoaderError::InvalidPly(_))
        ));
    }

    #[test]
    fn test_parse_pcd_ascii() -> Result<()> {
        let text = "# .PCD v0.7 - Point Cloud Data file format\n\
                    VERSION 0.7\n\
                    FIELDS x y z intensity\n\
                    SIZE 4 4 4 4\n\
                    TYPE F F F F\n\
                    COUNT 1 1 1 1\n\
                    WIDTH 3\n\
                    HEIGHT 1\n\
                    VIEWPOINT 0 0 0 1 0 0 0\n\
                    POINTS 3\n\
                    DATA ascii\n\
                    1 2 3 0.5\n\
                    4 5 6 0.25\n\
                    -1 -2 -3 1\n";

        let cloud = parse_pcd(text.as_bytes())?;
        assert_eq!(cloud.len(), 3);
        assert_eq!(cloud.position(2), [-1.0, -2.0, -3.0]);
        assert_eq!(cloud.intensity, Some(vec![0.5, 0.25, 1.0]));
        Ok(())
    }

    #[test]
    fn test_parse_pcd_binary() -> Result<()> {
        let mut bytes = b"VERSION 0.7\nFIELDS x y z rgb intensity\nSIZE 4 4 4 4 2\n\
TYPE F F F U U\nCOUNT 1 1 1 1 1\nWIDTH 2\nHEIGHT 1\nPOINTS 2\nDATA binary\n"
            .to_vec();
        for (p, i) in [([1.5f32, -2.0, 0.25], 7u16), ([3.0f32, 4.0, 5.0], 300u16)] {
            for v in p {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            bytes.extend_from_slice(&0u32.to_le_bytes());
            bytes.extend_from_slice(&i.to_le_bytes());
        }

        let cloud = parse_pcd(&bytes)?;
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.position(0), [1.5, -2.0, 0.25]);
        assert_eq!(cloud.position(1), [3.0, 4.0, 5.0]);
        assert_eq!(cloud.intensity, Some(vec![7.0, 300.0]));
        Ok(())
    }

    #[test]
    fn test_parse_pcd_truncated_binary() {
        let mut bytes =
            b"FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nWIDTH 2\nHEIGHT 1\nPOINTS 2\nDATA binary\n"
                .to_vec();
        bytes.extend_from_slice(&1.0f32.to_le_bytes());

        assert!(matches!(parse_pcd(&bytes), Err(LoaderError::InvalidPcd(_))));
    }

    #[test]
    fn test_parse_pcd_huge_point_count() {
        let ascii = b"FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nWIDTH 1\nHEIGHT 1\nPOINTS 4611686018427387904\nDATA ascii\n1.0 2.0 3.0\n";
        assert!(matches!(parse_pcd(ascii), Err(LoaderError::InvalidPcd(_))));

        let mut binary =
            b"FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nWIDTH 1\nHEIGHT 1\nPOINTS 1537228672809129302\nDATA binary\n"
                .to_vec();
        binary.extend_from_slice(&[0u8; 12]);
        assert!(matches!(parse_pcd(&binary), Err(LoaderError::InvalidPcd(_))));
    }

    #[test]
    fn test_parse_pcd_width_height_overflow() {
        let bytes = b"FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nWIDTH 4294967296\nHEIGHT 4294967296\nDATA binary\n";
        assert!(matches!(parse_pcd(bytes), Err(LoaderError::InvalidPcd(_))));
    }

    #[test]
    fn test_load_ply_huge_vertex_count() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ply").unwrap();
        writeln!(file, "format ascii 1.0").unwrap();
        writeln!(file, "element vertex 4611686018427387904").unwrap();
        writeln!(file, "property float x").unwrap();
        writeln!(file, "property float y").unwrap();
        writeln!(file, "property float z").unwrap();
        writeln!(file, "end_header").unwrap();
        writeln!(file, "1.0 2.0 3.0").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            load_ply(file.path()),
            Err(LoaderError::InvalidPly(_))
        ));
    }

    #[test]
    fn test_parse_pcd_rejects_compressed() {
        let bytes = b"FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nWIDTH 0\nHEIGHT 1\nPOINTS 0\nDATA binary_compressed\n";
        assert!(matches!(parse_pcd(bytes), Err(LoaderError::InvalidPcd(_))));
    }

    #[test]
    fn test_parse_pcd_missing_z() {
        let text = "FIELDS x y\nSIZE 4 4\nTYPE F F\nCOUNT 1 1\nWIDTH 1\nHEIGHT 1\nPOINTS 1\nDATA ascii\n1 2\n";
        assert!(matches!(
            parse_pcd(text.as_bytes()),
            Err(LoaderError::MissingColumns(_))
        ));
    }

    #[test]
    fn test_load_cloud_dispatch() {
        let file = NamedTempFile::with_suffix(".xyz").unwrap();
        assert!(matches!(
            load_cloud(file.path()),
            Err(LoaderError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_list_frames_numeric_order() -> Result<()> {
        let dir = TempDir::new().unwrap();
        for name in ["frame_10.pcd", "frame_2.pcd", "notes.txt", "frame_1.ply", "extra.csv"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let frames = list_frames(dir.path())?;
        let names: Vec<String> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["frame_1.ply", "frame_2.pcd", "frame_10.pcd", "extra.csv"]);
        Ok(())
    }
}
