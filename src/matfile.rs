//
// matfile.rs
// Odf-Tools-rs
//
// Reads and writes MATLAB level-4 matrix files, the container DSI Studio uses for fib files.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteordered::{ByteOrdered, Endianness};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array2, ArrayView2};
use tempfile::NamedTempFile;

use crate::error::{ConvertError, Result};

const HEADER_LEN: usize = 20;
const MAX_NAME_LEN: i32 = 4096;

/// Storage type of a level-4 matrix (the `P` digit of the type code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    F64,
    F32,
    I32,
    I16,
    U16,
    U8,
}

impl Precision {
    fn code(self) -> i32 {
        match self {
            Precision::F64 => 0,
            Precision::F32 => 1,
            Precision::I32 => 2,
            Precision::I16 => 3,
            Precision::U16 => 4,
            Precision::U8 => 5,
        }
    }

    fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Precision::F64),
            1 => Some(Precision::F32),
            2 => Some(Precision::I32),
            3 => Some(Precision::I16),
            4 => Some(Precision::U16),
            5 => Some(Precision::U8),
            _ => None,
        }
    }
}

/// A named real matrix. Values are kept as `f64` in column-major order and
/// converted back to `precision` on write.
#[derive(Debug, Clone, PartialEq)]
pub struct MatMatrix {
    rows: usize,
    cols: usize,
    precision: Precision,
    data: Vec<f64>,
}

impl MatMatrix {
    pub fn new(rows: usize, cols: usize, precision: Precision, data: Vec<f64>) -> Result<Self> {
        if rows * cols != data.len() {
            return Err(ConvertError::MatFormat(format!(
                "{}x{} matrix needs {} values, got {}",
                rows,
                cols,
                rows * cols,
                data.len()
            )));
        }
        Ok(Self {
            rows,
            cols,
            precision,
            data,
        })
    }

    pub fn from_array(array: ArrayView2<'_, f64>, precision: Precision) -> Self {
        let (rows, cols) = array.dim();
        // Iterating the transposed view walks the array in column-major order.
        let data = array.t().iter().copied().collect();
        Self {
            rows,
            cols,
            precision,
            data,
        }
    }

    /// 1-D data is stored as a `1 x n` row vector.
    pub fn row_vector<I>(values: I, precision: Precision) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let data: Vec<f64> = values.into_iter().collect();
        Self {
            rows: 1,
            cols: data.len(),
            precision,
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw values in column-major order; for vectors this is simply the vector.
    pub fn values(&self) -> &[f64] {
        &self.data
    }

    pub fn to_array(&self) -> Array2<f64> {
        let rows = self.rows;
        Array2::from_shape_fn((self.rows, self.cols), |(r, c)| self.data[c * rows + r])
    }
}

/// Ordered collection of named matrices, as stored in one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatFile {
    entries: Vec<(String, MatMatrix)>,
}

impl MatFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a matrix, replacing any previous entry with the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, matrix: MatMatrix) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = matrix,
            None => self.entries.push((name, matrix)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MatMatrix> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, matrix)| matrix)
    }

    pub fn require(&self, name: &str) -> Result<&MatMatrix> {
        self.get(name).ok_or_else(|| ConvertError::MissingKey {
            key: name.to_string(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut file = MatFile::new();
        let mut header = [0u8; HEADER_LEN];
        while fill_header(&mut reader, &mut header)? {
            let (name, matrix) = read_matrix(&mut reader, &header)?;
            file.insert(name, matrix);
        }
        Ok(file)
    }

    /// Writes every entry little-endian, uncompressed.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut out = ByteOrdered::le(writer);
        for (name, matrix) in &self.entries {
            // Type code MOPT with M = 0 (IEEE little endian), O = 0, T = 0 (full numeric).
            out.write_i32(matrix.precision.code() * 10)?;
            out.write_i32(to_i32(matrix.rows, name)?)?;
            out.write_i32(to_i32(matrix.cols, name)?)?;
            out.write_i32(0)?;
            out.write_i32(to_i32(name.len() + 1, name)?)?;
            out.write_all(name.as_bytes())?;
            out.write_u8(0)?;
            for &value in &matrix.data {
                match matrix.precision {
                    Precision::F64 => out.write_f64(value)?,
                    Precision::F32 => out.write_f32(value as f32)?,
                    Precision::I32 => out.write_i32(value as i32)?,
                    Precision::I16 => out.write_i16(value as i16)?,
                    Precision::U16 => out.write_u16(value as u16)?,
                    Precision::U8 => out.write_u8(value as u8)?,
                }
            }
        }
        out.flush()?;
        Ok(())
    }
}

/// Whether a path names a gzip-compressed file (`*.gz`).
pub fn is_gz_path(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

/// Loads a level-4 file, decompressing on the fly for `.gz` paths.
pub fn read_file(path: &Path) -> Result<MatFile> {
    let file = BufReader::new(File::open(path)?);
    if is_gz_path(path) {
        MatFile::read_from(BufReader::new(GzDecoder::new(file)))
    } else {
        MatFile::read_from(file)
    }
}

/// Writes `mat` next to `path` and renames it into place once complete, so a
/// failed write never leaves a truncated file behind.
pub fn write_file(path: &Path, mat: &MatFile) -> Result<()> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(parent)?;
    {
        let writer = BufWriter::new(staged.as_file_mut());
        if is_gz_path(path) {
            let mut encoder = GzEncoder::new(writer, Compression::default());
            mat.write_to(&mut encoder)?;
            encoder.finish()?.flush()?;
        } else {
            mat.write_to(writer)?;
        }
    }
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn to_i32(value: usize, name: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| ConvertError::MatFormat(format!("`{}` is too large for level 4", name)))
}

/// Reads the next fixed header; `false` on a clean end of file.
fn fill_header<R: Read>(reader: &mut R, header: &mut [u8; HEADER_LEN]) -> Result<bool> {
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(ConvertError::MatFormat(
                    "file ends inside a matrix header".to_string(),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn detect_endianness(raw: [u8; 4]) -> Result<Endianness> {
    let le = i32::from_le_bytes(raw);
    if (0..1000).contains(&le) {
        return Ok(Endianness::Little);
    }
    let be = i32::from_be_bytes(raw);
    if (1000..2000).contains(&be) {
        return Ok(Endianness::Big);
    }
    Err(ConvertError::MatFormat(format!(
        "unrecognised type code {}",
        le
    )))
}

fn read_matrix<R: Read>(reader: &mut R, header: &[u8; HEADER_LEN]) -> Result<(String, MatMatrix)> {
    let endianness = detect_endianness([header[0], header[1], header[2], header[3]])?;
    let mut fields = ByteOrdered::runtime(&header[..], endianness);
    let type_code = fields.read_i32()?;
    let rows = fields.read_i32()?;
    let cols = fields.read_i32()?;
    let imagf = fields.read_i32()?;
    let namlen = fields.read_i32()?;

    let order = (type_code / 100) % 10;
    let precision_code = (type_code / 10) % 10;
    let kind = type_code % 10;
    if order != 0 {
        return Err(ConvertError::MatFormat(format!(
            "reserved digit must be 0, found type code {}",
            type_code
        )));
    }
    if rows < 0 || cols < 0 || namlen <= 0 || namlen > MAX_NAME_LEN {
        return Err(ConvertError::MatFormat(format!(
            "bad header (rows {}, cols {}, name length {})",
            rows, cols, namlen
        )));
    }

    let mut name_bytes = vec![0u8; namlen as usize];
    reader.read_exact(&mut name_bytes)?;
    while name_bytes.last() == Some(&0) {
        name_bytes.pop();
    }
    let name = String::from_utf8_lossy(&name_bytes).into_owned();

    if kind == 2 {
        return Err(ConvertError::malformed(&name, "sparse matrices are not supported"));
    }
    if kind > 2 {
        return Err(ConvertError::malformed(&name, format!("unknown matrix type {}", kind)));
    }
    if imagf != 0 {
        return Err(ConvertError::malformed(&name, "complex matrices are not supported"));
    }
    let precision = Precision::from_code(precision_code).ok_or_else(|| {
        ConvertError::malformed(&name, format!("unknown precision code {}", precision_code))
    })?;

    let (rows, cols) = (rows as usize, cols as usize);
    let count = rows * cols;
    let mut data = Vec::with_capacity(count.min(1 << 20));
    let mut values = ByteOrdered::runtime(reader, endianness);
    for _ in 0..count {
        let value = match precision {
            Precision::F64 => values.read_f64()?,
            Precision::F32 => f64::from(values.read_f32()?),
            Precision::I32 => f64::from(values.read_i32()?),
            Precision::I16 => f64::from(values.read_i16()?),
            Precision::U16 => f64::from(values.read_u16()?),
            Precision::U8 => f64::from(values.read_u8()?),
        };
        data.push(value);
    }

    Ok((
        name,
        MatMatrix {
            rows,
            cols,
            precision,
            data,
        },
    ))
}
