use qu::ick_use::*;
use serde::Serialize;
use std::{fs, io, path::Path};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

// Helpers to parse fields with quirks.

/// Parse a matrix cell. Empty and `NA`-style cells count as `0`.
pub fn parse_count(s: &str) -> Result<f64> {
    let s = s.trim();
    if s.is_empty()
        || s.eq_ignore_ascii_case("na")
        || s.eq_ignore_ascii_case("nan")
        || s.eq_ignore_ascii_case("null")
    {
        return Ok(0.);
    }
    let v: f64 = s
        .parse()
        .map_err(|_| format_err!("expected a number, found \"{}\"", s))?;
    Ok(if v.is_nan() { 0. } else { v })
}

/// Guess the delimiter of a PMBB extract from its extension. `.txt` and `.tsv` files are tab
/// separated, everything else is treated as CSV.
pub fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("txt") | Some("tsv") => b'\t',
        _ => b',',
    }
}

/// Write a value as pretty-printed JSON.
pub fn save_json<T: Serialize + ?Sized>(value: &T, path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result {
        let out = io::BufWriter::new(crate::create_output(path)?);
        serde_json::to_writer_pretty(out, value)?;
        Ok(())
    }
    let path = path.as_ref();
    inner(value, path).with_context(|| format!("writing json to \"{}\"", path.display()))
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}

#[cfg(test)]
mod test {
    use super::{delimiter_for, parse_count};
    use std::path::Path;

    #[test]
    fn missing_cells_are_zero() {
        for input in ["", " ", "NA", "nan", "NaN", "null"] {
            assert_eq!(parse_count(input).unwrap(), 0.);
        }
        assert_eq!(parse_count("3").unwrap(), 3.);
        assert_eq!(parse_count(" 1.5 ").unwrap(), 1.5);
        assert!(parse_count("yes").is_err());
    }

    #[test]
    fn delimiters() {
        assert_eq!(
            delimiter_for(Path::new("PMBB-Release-2020-2.3_phenotype_icd-10-matrix.txt")),
            b'\t'
        );
        assert_eq!(delimiter_for(Path::new("filtered_icd10_matrix.csv")), b',');
    }
}
