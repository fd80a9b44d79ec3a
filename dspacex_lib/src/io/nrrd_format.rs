//! Helper functions for the NRRD volume format
//!
//! Supports attached and detached (`data file`) headers with `raw`, `gzip` and `ascii` encoding
//! of all scalar element types. Values are always converted to `f64`.

use crate::io::io_utils::{Endianness, bytes_to_f64, decode_values};
use anyhow::{Context, anyhow};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::trace;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// A scalar volume loaded from a NRRD file
#[derive(Clone, Debug, PartialEq)]
pub struct NrrdVolume {
    /// Number of samples along each axis, fastest axis first
    pub sizes: Vec<usize>,
    /// Sample values, the first axis varies fastest
    pub data: Vec<f64>,
}

impl NrrdVolume {
    /// Number of samples in the volume
    pub fn num_values(&self) -> usize {
        self.sizes.iter().product()
    }

    /// Computes the maximum-intensity projection of the volume along its last axis
    ///
    /// Returns the width and height of the projection together with the projected values in
    /// row-major order. Two dimensional volumes are returned unchanged.
    pub fn maximum_intensity_projection(&self) -> Result<(usize, usize, Vec<f64>), anyhow::Error> {
        match self.sizes.as_slice() {
            &[width, height] => Ok((width, height, self.data.clone())),
            &[width, height, depth] => {
                let slice_len = width * height;
                let mut projection = vec![f64::NEG_INFINITY; slice_len];
                for z in 0..depth {
                    let slice = &self.data[z * slice_len..(z + 1) * slice_len];
                    for (p, &v) in projection.iter_mut().zip(slice) {
                        *p = p.max(v);
                    }
                }
                Ok((width, height, projection))
            }
            sizes => Err(anyhow!(
                "Projection is only supported for 2D and 3D volumes (got {} dimensions)",
                sizes.len()
            )),
        }
    }
}

/// Scalar element types of NRRD volumes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ElementType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
}

impl ElementType {
    fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "signed char" | "int8" | "int8_t" => Self::Int8,
            "uchar" | "unsigned char" | "uint8" | "uint8_t" => Self::UInt8,
            "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => {
                Self::Int16
            }
            "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => {
                Self::UInt16
            }
            "int" | "signed int" | "int32" | "int32_t" => Self::Int32,
            "uint" | "unsigned int" | "uint32" | "uint32_t" => Self::UInt32,
            "longlong" | "long long" | "long long int" | "signed long long"
            | "signed long long int" | "int64" | "int64_t" => Self::Int64,
            "ulonglong" | "unsigned long long" | "unsigned long long int" | "uint64"
            | "uint64_t" => Self::UInt64,
            "float" => Self::Float,
            "double" => Self::Double,
            _ => return None,
        };
        Some(ty)
    }

    fn size(&self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float => 4,
            Self::Int64 | Self::UInt64 | Self::Double => 8,
        }
    }

    fn decode(&self, bytes: &[u8], endianness: Endianness) -> Result<Vec<f64>, anyhow::Error> {
        match self {
            Self::Int8 => decode_values::<1>(bytes, endianness, bytes_to_f64!(i8)),
            Self::UInt8 => decode_values::<1>(bytes, endianness, bytes_to_f64!(u8)),
            Self::Int16 => decode_values::<2>(bytes, endianness, bytes_to_f64!(i16)),
            Self::UInt16 => decode_values::<2>(bytes, endianness, bytes_to_f64!(u16)),
            Self::Int32 => decode_values::<4>(bytes, endianness, bytes_to_f64!(i32)),
            Self::UInt32 => decode_values::<4>(bytes, endianness, bytes_to_f64!(u32)),
            Self::Int64 => decode_values::<8>(bytes, endianness, bytes_to_f64!(i64)),
            Self::UInt64 => decode_values::<8>(bytes, endianness, bytes_to_f64!(u64)),
            Self::Float => decode_values::<4>(bytes, endianness, bytes_to_f64!(f32)),
            Self::Double => decode_values::<8>(bytes, endianness, bytes_to_f64!(f64)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Encoding {
    Raw,
    Gzip,
    Ascii,
}

/// The fields of a NRRD header required to read the data
#[derive(Clone, Debug)]
struct NrrdHeader {
    element_type: ElementType,
    sizes: Vec<usize>,
    encoding: Encoding,
    endianness: Endianness,
    data_file: Option<PathBuf>,
    line_skip: usize,
    byte_skip: i64,
}

/// Loads a NRRD volume from the given path, detached data files are resolved relative to the header
pub fn volume_from_nrrd<P: AsRef<Path>>(nrrd_file: P) -> Result<NrrdVolume, anyhow::Error> {
    let path = nrrd_file.as_ref();
    let mut content = Vec::new();
    File::open(path)
        .with_context(|| format!("Unable to open NRRD file \"{}\"", path.display()))?
        .read_to_end(&mut content)
        .context("Error while loading the file content")?;

    let (header_text, attached_data) = split_header(&content)?;
    let header = parse_header(header_text)
        .with_context(|| format!("Invalid NRRD header in \"{}\"", path.display()))?;
    trace!(
        "NRRD header of \"{}\": {:?}",
        path.display(),
        header
    );

    let detached_data;
    let data = match &header.data_file {
        Some(data_file) => {
            let data_path = path
                .parent()
                .map(|dir| dir.join(data_file))
                .unwrap_or_else(|| data_file.clone());
            let mut buffer = Vec::new();
            File::open(&data_path)
                .with_context(|| {
                    format!("Unable to open NRRD data file \"{}\"", data_path.display())
                })?
                .read_to_end(&mut buffer)
                .context("Error while loading the data file content")?;
            detached_data = buffer;
            detached_data.as_slice()
        }
        None => attached_data,
    };

    let values = read_values(&header, data)
        .with_context(|| format!("Failed to read data of NRRD file \"{}\"", path.display()))?;

    Ok(NrrdVolume {
        sizes: header.sizes,
        data: values,
    })
}

/// Writes the volume as little endian `double` NRRD file with attached data, optionally gzip compressed
pub fn volume_to_nrrd<P: AsRef<Path>>(
    volume: &NrrdVolume,
    nrrd_file: P,
    compress: bool,
) -> Result<(), anyhow::Error> {
    if volume.data.len() != volume.num_values() {
        return Err(anyhow!(
            "Volume sizes {:?} do not match the number of values ({})",
            volume.sizes,
            volume.data.len()
        ));
    }

    let path = nrrd_file.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Unable to create NRRD file \"{}\"", path.display()))?;
    let mut writer = BufWriter::new(file);

    let sizes = volume
        .sizes
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    write!(
        writer,
        "NRRD0004\ntype: double\ndimension: {}\nsizes: {}\nendian: little\nencoding: {}\n\n",
        volume.sizes.len(),
        sizes,
        if compress { "gzip" } else { "raw" }
    )?;

    let bytes = volume
        .data
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect::<Vec<_>>();
    if compress {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        encoder.write_all(&bytes)?;
        encoder.finish()?.flush()?;
    } else {
        writer.write_all(&bytes)?;
        writer.flush()?;
    }

    Ok(())
}

/// Splits the file content into the header text and the attached data following the first empty line
fn split_header(content: &[u8]) -> Result<(&str, &[u8]), anyhow::Error> {
    let mut offset = 0;
    let mut header_end = None;
    for line in content.split_inclusive(|&b| b == b'\n') {
        offset += line.len();
        if line == b"\n" || line == b"\r\n" {
            header_end = Some(offset);
            break;
        }
    }

    // Detached headers may end without an empty line
    let header_end = header_end.unwrap_or(content.len());
    let header = std::str::from_utf8(&content[..header_end])
        .context("NRRD header is not valid UTF-8")?;
    Ok((header, &content[header_end..]))
}

fn parse_header(text: &str) -> Result<NrrdHeader, anyhow::Error> {
    let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));
    let magic = lines.next().unwrap_or_default();
    let version = parser::magic(magic)
        .map(|(_, version)| version)
        .map_err(|_| anyhow!("Missing NRRD magic line (found \"{}\")", magic))?;
    trace!("NRRD format version {}", version);

    let mut element_type = None;
    let mut sizes = None;
    let mut dimension = None;
    let mut encoding = None;
    let mut endianness = Endianness::Little;
    let mut data_file = None;
    let mut line_skip = 0;
    let mut byte_skip = 0;

    for line in lines {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (_, (name, is_key_value, value)) =
            parser::field(line).map_err(|_| anyhow!("Invalid header line \"{}\"", line))?;
        if is_key_value {
            continue;
        }

        match name.to_lowercase().as_str() {
            "type" => {
                element_type = Some(
                    ElementType::from_name(value)
                        .ok_or_else(|| anyhow!("Unsupported element type \"{}\"", value))?,
                )
            }
            "dimension" => {
                dimension = Some(
                    value
                        .parse::<usize>()
                        .with_context(|| format!("Invalid dimension \"{}\"", value))?,
                )
            }
            "sizes" => {
                sizes = Some(
                    value
                        .split_whitespace()
                        .map(|s| s.parse::<usize>())
                        .collect::<Result<Vec<_>, _>>()
                        .with_context(|| format!("Invalid sizes \"{}\"", value))?,
                )
            }
            "encoding" => {
                encoding = Some(match value {
                    "raw" => Encoding::Raw,
                    "gzip" | "gz" => Encoding::Gzip,
                    "ascii" | "text" | "txt" => Encoding::Ascii,
                    _ => return Err(anyhow!("Unsupported encoding \"{}\"", value)),
                })
            }
            "endian" => {
                endianness = match value {
                    "little" => Endianness::Little,
                    "big" => Endianness::Big,
                    _ => return Err(anyhow!("Invalid endianness \"{}\"", value)),
                }
            }
            "data file" | "datafile" => {
                if value.starts_with("LIST") || value.split_whitespace().count() > 1 {
                    return Err(anyhow!("Multiple detached data files are not supported"));
                }
                data_file = Some(PathBuf::from(value));
            }
            "line skip" | "lineskip" => {
                line_skip = value
                    .parse()
                    .with_context(|| format!("Invalid line skip \"{}\"", value))?
            }
            "byte skip" | "byteskip" => {
                byte_skip = value
                    .parse()
                    .with_context(|| format!("Invalid byte skip \"{}\"", value))?
            }
            _ => {}
        }
    }

    let element_type = element_type.ok_or_else(|| anyhow!("Missing \"type\" field"))?;
    let sizes = sizes.ok_or_else(|| anyhow!("Missing \"sizes\" field"))?;
    let encoding = encoding.ok_or_else(|| anyhow!("Missing \"encoding\" field"))?;
    if let Some(dimension) = dimension {
        if dimension != sizes.len() {
            return Err(anyhow!(
                "Dimension {} does not match the number of sizes ({})",
                dimension,
                sizes.len()
            ));
        }
    }
    if byte_skip < -1 {
        return Err(anyhow!("Invalid byte skip {}", byte_skip));
    }

    Ok(NrrdHeader {
        element_type,
        sizes,
        encoding,
        endianness,
        data_file,
        line_skip,
        byte_skip,
    })
}

fn read_values(header: &NrrdHeader, data: &[u8]) -> Result<Vec<f64>, anyhow::Error> {
    let num_values = header
        .sizes
        .iter()
        .try_fold(1usize, |acc, &size| acc.checked_mul(size))
        .ok_or_else(|| anyhow!("Volume sizes {:?} are too large", header.sizes))?;
    let num_bytes = num_values
        .checked_mul(header.element_type.size())
        .ok_or_else(|| anyhow!("Volume sizes {:?} are too large", header.sizes))?;

    let mut data = data;
    for _ in 0..header.line_skip {
        let next_line = data
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| anyhow!("Unable to skip {} lines of data", header.line_skip))?;
        data = &data[next_line + 1..];
    }

    let values = match header.encoding {
        Encoding::Ascii => {
            let text = std::str::from_utf8(data).context("ASCII data is not valid UTF-8")?;
            text.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|s| !s.is_empty())
                .take(num_values)
                .map(|s| {
                    s.parse::<f64>()
                        .with_context(|| format!("Invalid value \"{}\"", s))
                })
                .collect::<Result<Vec<_>, _>>()?
        }
        Encoding::Raw => {
            let bytes = skip_bytes(data, header.byte_skip, num_bytes)?;
            header.element_type.decode(bytes, header.endianness)?
        }
        Encoding::Gzip => {
            let mut decompressed = Vec::new();
            GzDecoder::new(data)
                .read_to_end(&mut decompressed)
                .context("Error during gzip decompression")?;
            let bytes = skip_bytes(&decompressed, header.byte_skip, num_bytes)?;
            header.element_type.decode(bytes, header.endianness)?
        }
    };

    if values.len() != num_values {
        return Err(anyhow!(
            "Expected {} values, found {}",
            num_values,
            values.len()
        ));
    }

    Ok(values)
}

/// Returns the `num_bytes` data bytes after skipping, a skip of `-1` selects the last bytes of the buffer
fn skip_bytes(data: &[u8], byte_skip: i64, num_bytes: usize) -> Result<&[u8], anyhow::Error> {
    let start = if byte_skip == -1 {
        data.len().checked_sub(num_bytes)
    } else {
        Some(byte_skip as usize)
    };

    start
        .and_then(|start| data.get(start..start.checked_add(num_bytes)?))
        .ok_or_else(|| {
            anyhow!(
                "Expected {} bytes of data, found {}",
                num_bytes,
                data.len()
            )
        })
}

mod parser {
    use nom::bytes::complete::{tag, take_until};
    use nom::character::complete::{digit1, space0};
    use nom::combinator::{all_consuming, map_res, opt, rest};
    use nom::sequence::preceded;
    use nom::{IResult, Parser};

    /// Parses the magic line `NRRD000X` and returns the format version
    pub(super) fn magic(input: &str) -> IResult<&str, u32> {
        all_consuming(preceded(
            tag("NRRD"),
            map_res(digit1, |s: &str| s.parse::<u32>()),
        ))
        .parse(input)
    }

    /// Parses a `<field>: <desc>` line or a `<key>:=<value>` line
    ///
    /// Returns the trimmed name, whether the line is a key/value pair and the value.
    pub(super) fn field(input: &str) -> IResult<&str, (&str, bool, &str)> {
        let (input, name) = take_until(":").parse(input)?;
        let (input, _) = tag(":").parse(input)?;
        let (input, key_value) = opt(tag("=")).parse(input)?;
        let (input, _) = space0.parse(input)?;
        let (input, value) = rest.parse(input)?;
        Ok((input, (name.trim(), key_value.is_some(), value.trim_end())))
    }

    #[test]
    fn test_header_line_parsers() {
        assert_eq!(magic("NRRD0004"), Ok(("", 4)));
        assert!(magic("NRRX0004").is_err());
        assert!(magic("NRRD").is_err());

        assert_eq!(field("sizes: 2 3 4"), Ok(("", ("sizes", false, "2 3 4"))));
        assert_eq!(field("data file:  a.raw "), Ok(("", ("data file", false, "a.raw"))));
        assert_eq!(field("author:=me"), Ok(("", ("author", true, "me"))));
        assert!(field("no separator").is_err());
    }
}
