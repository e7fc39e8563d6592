//! Minimal reader/writer for NumPy `.npy` files (format version 1.0, little endian, C order).
//!
//! Only what the pipeline persists is supported: `f32`, `f64` and `i64` arrays of any rank.
use ndarray::{Array1, Array2, ArrayView2};
use qu::ick_use::*;
use regex::Regex;
use std::{
    fs,
    io::{self, Read, Write},
    path::Path,
};

const MAGIC: &[u8] = b"\x93NUMPY";

/// An element type that can be stored in a `.npy` file.
pub trait Element: Copy {
    /// The numpy dtype string.
    const DESCR: &'static str;
    const SIZE: usize;
    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! element {
    ($ty:ty, $descr:literal) => {
        impl Element for $ty {
            const DESCR: &'static str = $descr;
            const SIZE: usize = std::mem::size_of::<$ty>();
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }
        }
    };
}

element!(f32, "<f4");
element!(f64, "<f8");
element!(i64, "<i8");

fn header(descr: &str, shape: &[usize]) -> Vec<u8> {
    let shape = match shape {
        [len] => format!("({},)", len),
        _ => format!(
            "({})",
            shape
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut dict = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        descr, shape
    );
    // magic + version + header length, then the dict padded so the data starts on a multiple
    // of 64 bytes.
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    dict.extend(std::iter::repeat(' ').take(padding));
    dict.push('\n');

    let mut out = Vec::with_capacity(unpadded + padding);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out
}

/// Write a flat buffer with the given shape.
pub fn write<T: Element>(path: impl AsRef<Path>, shape: &[usize], data: &[T]) -> Result {
    fn inner<T: Element>(path: &Path, shape: &[usize], data: &[T]) -> Result {
        ensure!(
            shape.iter().product::<usize>() == data.len(),
            "shape {:?} does not match {} elements",
            shape,
            data.len()
        );
        let mut bytes = header(T::DESCR, shape);
        bytes.reserve(data.len() * T::SIZE);
        for v in data {
            v.write_le(&mut bytes);
        }
        let mut out = io::BufWriter::new(crate::create_output(path)?);
        out.write_all(&bytes)?;
        out.flush()?;
        Ok(())
    }
    let path = path.as_ref();
    crate::check_extension(path, "npy")?;
    inner(path, shape, data).with_context(|| format!("writing array to \"{}\"", path.display()))
}

/// Read a file, returning its shape and flat data.
pub fn read<T: Element>(path: impl AsRef<Path>) -> Result<(Vec<usize>, Vec<T>)> {
    fn inner<T: Element>(path: &Path) -> Result<(Vec<usize>, Vec<T>)> {
        let mut bytes = vec![];
        io::BufReader::new(fs::File::open(path)?).read_to_end(&mut bytes)?;
        ensure!(bytes.starts_with(MAGIC), "not a .npy file");
        ensure!(bytes.len() >= 10, "truncated header");
        let (header_len, header_start) = match bytes[6] {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
            2 | 3 => {
                ensure!(bytes.len() >= 12, "truncated header");
                (
                    u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                    12,
                )
            }
            v => bail!("unsupported .npy version {}", v),
        };
        let data_start = header_start + header_len;
        ensure!(bytes.len() >= data_start, "truncated header");
        let dict = std::str::from_utf8(&bytes[header_start..data_start])?;
        let shape = parse_header(dict, T::DESCR)?;

        let len: usize = shape.iter().product();
        let data = &bytes[data_start..];
        ensure!(
            data.len() == len * T::SIZE,
            "expected {} bytes of data, found {}",
            len * T::SIZE,
            data.len()
        );
        let values = data.chunks_exact(T::SIZE).map(T::read_le).collect();
        Ok((shape, values))
    }
    let path = path.as_ref();
    inner(path).with_context(|| format!("reading array from \"{}\"", path.display()))
}

fn parse_header(dict: &str, expected_descr: &str) -> Result<Vec<usize>> {
    let descr = Regex::new(r"'descr':\s*'([^']*)'")?
        .captures(dict)
        .and_then(|c| c.get(1))
        .context("header has no descr")?
        .as_str();
    ensure!(
        descr == expected_descr,
        "expected dtype {}, found {}",
        expected_descr,
        descr
    );
    let fortran = Regex::new(r"'fortran_order':\s*(True|False)")?
        .captures(dict)
        .and_then(|c| c.get(1))
        .context("header has no fortran_order")?
        .as_str();
    ensure!(fortran == "False", "fortran order arrays are not supported");
    let shape = Regex::new(r"'shape':\s*\(([^)]*)\)")?
        .captures(dict)
        .and_then(|c| c.get(1))
        .context("header has no shape")?
        .as_str();
    shape
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.parse::<usize>().map_err(Error::from))
        .collect()
}

pub fn write_array2<T: Element>(path: impl AsRef<Path>, array: ArrayView2<'_, T>) -> Result {
    let (rows, cols) = array.dim();
    // `iter` walks in logical (row-major) order regardless of memory layout.
    let data: Vec<T> = array.iter().copied().collect();
    write(path, &[rows, cols], &data)
}

pub fn read_array2<T: Element>(path: impl AsRef<Path>) -> Result<Array2<T>> {
    let path = path.as_ref();
    let (shape, data) = read::<T>(path)?;
    match shape[..] {
        [rows, cols] => Ok(Array2::from_shape_vec((rows, cols), data)?),
        _ => bail!(
            "expected a 2 dimensional array in \"{}\", found shape {:?}",
            path.display(),
            shape
        ),
    }
}

pub fn write_array1<T: Element>(path: impl AsRef<Path>, data: &[T]) -> Result {
    write(path, &[data.len()], data)
}

pub fn read_array1<T: Element>(path: impl AsRef<Path>) -> Result<Array1<T>> {
    let path = path.as_ref();
    let (shape, data) = read::<T>(path)?;
    ensure!(
        shape.len() == 1,
        "expected a 1 dimensional array in \"{}\", found shape {:?}",
        path.display(),
        shape
    );
    Ok(Array1::from_vec(data))
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn header_alignment() {
        for shape in [&[3usize, 4][..], &[10], &[123456, 256]] {
            let h = header("<f4", shape);
            assert_eq!(h.len() % 64, 0);
            assert_eq!(*h.last().unwrap(), b'\n');
        }
        let h = header("<i8", &[5]);
        let text = std::str::from_utf8(&h[10..]).unwrap();
        assert!(text.starts_with("{'descr': '<i8', 'fortran_order': False, 'shape': (5,), }"));
    }

    #[test]
    fn matrix_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.npy");
        let m = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.5]];
        write_array2(&path, m.view()).unwrap();
        assert_eq!(read_array2::<f32>(&path).unwrap(), m);
        // wrong dtype
        assert!(read_array2::<f64>(&path).is_err());
        // wrong rank
        assert!(read_array1::<f32>(&path).is_err());
    }

    #[test]
    fn transposed_views_are_written_logically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.npy");
        let m = array![[1i64, 2], [3, 4], [5, 6]];
        write_array2(&path, m.t()).unwrap();
        assert_eq!(read_array2::<i64>(&path).unwrap(), m.t().to_owned());
    }

    #[test]
    fn rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.npy");
        std::fs::write(&path, b"hello").unwrap();
        assert!(read::<f32>(&path).is_err());
        assert!(write(dir.path().join("x.npy"), &[2, 2], &[1.0f32]).is_err());
        assert!(write(dir.path().join("x.bin"), &[1], &[1.0f32]).is_err());
    }
}
