//! Selecting a patient cohort and cutting the PMBB extracts down to it.
use qu::ick_use::*;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
};

use crate::{icd10, matrix::CodeMatrix, util::delimiter_for, ArcStr, PatientId, ID_COLUMN};

/// One row of an extract, keyed by column name. Numeric cells are stored as JSON numbers.
pub type Record = BTreeMap<ArcStr, serde_json::Value>;

/// For each patient, the rows found in each extract (keyed by file name).
pub type PatientRecords = BTreeMap<PatientId, BTreeMap<String, Vec<Record>>>;

/// Randomly pick `n` patients with a positive value for `code`.
///
/// If fewer than `n` patients qualify, all of them are returned. Codes starting with
/// `exclude_prefix`, or missing from the matrix, select nobody.
pub fn sample_patients_with_code(
    matrix: &CodeMatrix,
    code: &str,
    n: usize,
    seed: Option<u64>,
    exclude_prefix: &str,
) -> Result<Vec<PatientId>> {
    let eligible = if icd10::is_excluded(code, exclude_prefix) {
        event!(
            Level::WARN,
            "code {} is excluded by the prefix \"{}\"",
            code,
            exclude_prefix
        );
        vec![]
    } else if !matrix.has_column(code) {
        event!(Level::WARN, "code {} does not appear in the matrix", code);
        vec![]
    } else {
        matrix.patients_with_code(code)?
    };

    if eligible.len() < n {
        event!(
            Level::WARN,
            "Only {} eligible patients available",
            eligible.len()
        );
        return Ok(eligible);
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let sampled: Vec<PatientId> = eligible.choose_multiple(&mut rng, n).cloned().collect();
    event!(
        Level::INFO,
        "sampled {} of {} patients with code {}",
        sampled.len(),
        eligible.len(),
        code
    );
    Ok(sampled)
}

/// Write ids as a single `PMBB_ID` column.
pub fn save_patient_ids(ids: &[PatientId], path: impl AsRef<Path>) -> Result {
    fn inner(ids: &[PatientId], path: &Path) -> Result {
        let mut writer = csv::Writer::from_writer(crate::create_output(path)?);
        writer.write_record([ID_COLUMN])?;
        for id in ids {
            writer.write_record([&**id])?;
        }
        writer.flush()?;
        Ok(())
    }
    let path = path.as_ref();
    inner(ids, path).with_context(|| format!("writing patient ids to \"{}\"", path.display()))
}

/// Read the `PMBB_ID` column of a CSV file, skipping blanks and repeats.
pub fn load_patient_ids(path: impl AsRef<Path>) -> Result<Vec<PatientId>> {
    #[derive(Deserialize)]
    struct Row {
        #[serde(rename = "PMBB_ID")]
        id: Option<String>,
    }

    fn inner(path: &Path) -> Result<Vec<PatientId>> {
        let mut seen = BTreeSet::new();
        let mut ids = vec![];
        let rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;
        for row in rdr.into_deserialize() {
            let row: Row = row?;
            match row.id {
                Some(id) if !id.is_empty() => {
                    let id: PatientId = id.into();
                    if seen.insert(id.clone()) {
                        ids.push(id);
                    }
                }
                _ => (),
            }
        }
        Ok(ids)
    }
    let path = path.as_ref();
    let ids = inner(path)
        .with_context(|| format!("loading patient ids from \"{}\"", path.display()))?;
    event!(Level::INFO, "Loaded {} sampled patient IDs", ids.len());
    Ok(ids)
}

/// Copy the rows of a delimited file whose `PMBB_ID` is in `ids`, keeping the delimiter.
///
/// Returns how many of the ids had at least one row, or `None` (after a warning) if the file has
/// no `PMBB_ID` column, in which case nothing is written.
pub fn filter_dataset_by_ids(
    path: impl AsRef<Path>,
    ids: &BTreeSet<PatientId>,
    output: impl AsRef<Path>,
) -> Result<Option<usize>> {
    fn inner(path: &Path, ids: &BTreeSet<PatientId>, output: &Path) -> Result<Option<usize>> {
        let delimiter = delimiter_for(path);
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .from_reader(io::BufReader::new(fs::File::open(path)?));
        let headers = rdr.headers()?.clone();
        let id_pos = match headers.iter().position(|h| h.trim() == ID_COLUMN) {
            Some(pos) => pos,
            None => {
                event!(
                    Level::WARN,
                    "No {} column in \"{}\"",
                    ID_COLUMN,
                    path.display()
                );
                return Ok(None);
            }
        };

        // read everything first, so a bad row leaves no partial output behind
        let mut kept = vec![];
        let mut found = BTreeSet::new();
        for record in rdr.records() {
            let record = record?;
            if let Some(id) = record.get(id_pos).map(str::trim) {
                if ids.contains(id) {
                    found.insert(id.to_owned());
                    kept.push(record);
                }
            }
        }

        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(crate::create_output(output)?);
        writer.write_record(&headers)?;
        for record in &kept {
            writer.write_record(record)?;
        }
        writer.flush()?;
        event!(
            Level::DEBUG,
            "kept {} rows for {} patients from \"{}\"",
            kept.len(),
            found.len(),
            path.display()
        );
        Ok(Some(found.len()))
    }
    let (path, output) = (path.as_ref(), output.as_ref());
    inner(path, ids, output).with_context(|| format!("filtering \"{}\"", path.display()))
}

/// Filter every file in `dir` into `out_dir` (same file names).
///
/// Returns, for each filtered file, how many of the ids had no matching row. Files that fail to
/// parse are logged and skipped.
pub fn filter_directory(
    dir: impl AsRef<Path>,
    ids: &BTreeSet<PatientId>,
    out_dir: impl AsRef<Path>,
) -> Result<BTreeMap<String, usize>> {
    let (dir, out_dir) = (dir.as_ref(), out_dir.as_ref());
    ensure!(
        !same_dir(dir, out_dir)?,
        "refusing to filter \"{}\" into itself",
        dir.display()
    );
    let mut files = fs::read_dir(dir)
        .with_context(|| format!("listing \"{}\"", dir.display()))?
        .map(|entry| Ok(entry?.path()))
        .collect::<Result<Vec<PathBuf>>>()?;
    files.sort();

    let mut unmatched = BTreeMap::new();
    for path in files.into_iter().filter(|p| p.is_file()) {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_owned(),
            None => continue,
        };
        match filter_dataset_by_ids(&path, ids, out_dir.join(&name)) {
            Ok(Some(found)) => {
                unmatched.insert(name, ids.len().saturating_sub(found));
            }
            Ok(None) => (),
            Err(e) => event!(Level::WARN, "Error filtering {}: {:#}", name, e),
        }
    }
    Ok(unmatched)
}

fn same_dir(a: &Path, b: &Path) -> Result<bool> {
    if !crate::path_exists(b)? {
        return Ok(false);
    }
    Ok(fs::canonicalize(a)? == fs::canonicalize(b)?)
}

/// Map each patient to the codes they have a non-zero value for, leaving out excluded codes.
/// Patients missing from the matrix map to no codes.
pub fn patient_codes(
    matrix: &CodeMatrix,
    patients: &[PatientId],
    exclude_prefix: &str,
) -> BTreeMap<PatientId, Vec<ArcStr>> {
    let mut missing = 0;
    let codes = patients
        .iter()
        .map(|id| {
            let codes = matrix
                .non_zero_codes(id, exclude_prefix)
                .unwrap_or_else(|| {
                    missing += 1;
                    vec![]
                });
            (id.clone(), icd10::sort_icd_codes(codes))
        })
        .collect();
    if missing > 0 {
        event!(
            Level::WARN,
            "{} patients were not found in the matrix",
            missing
        );
    }
    codes
}

/// Gather the rows of each patient from several extracts.
pub fn collect_patient_records(
    files: &[PathBuf],
    patients: &BTreeSet<PatientId>,
) -> Result<PatientRecords> {
    let mut records = PatientRecords::new();
    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("\"{}\" has no file name", path.display()))?
            .to_owned();
        for (id, record) in read_records(path, patients)? {
            records
                .entry(id)
                .or_default()
                .entry(name.clone())
                .or_default()
                .push(record);
        }
    }
    Ok(records)
}

fn read_records(path: &Path, patients: &BTreeSet<PatientId>) -> Result<Vec<(PatientId, Record)>> {
    fn inner(path: &Path, patients: &BTreeSet<PatientId>) -> Result<Vec<(PatientId, Record)>> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter_for(path))
            .trim(csv::Trim::All)
            .from_path(path)?;
        let headers: Vec<ArcStr> = rdr.headers()?.iter().map(Into::into).collect();
        let id_pos = headers
            .iter()
            .position(|h| &**h == ID_COLUMN)
            .with_context(|| format!("no {} column", ID_COLUMN))?;

        let mut out = vec![];
        for record in rdr.records() {
            let record = record?;
            let id = match record.get(id_pos) {
                Some(id) if patients.contains(id) => PatientId::from(id),
                _ => continue,
            };
            let row = headers
                .iter()
                .zip(record.iter())
                .enumerate()
                .filter(|(pos, _)| *pos != id_pos)
                .map(|(_, (h, v))| (h.clone(), json_value(v)))
                .collect();
            out.push((id, row));
        }
        Ok(out)
    }
    inner(path, patients).with_context(|| format!("reading records from \"{}\"", path.display()))
}

fn json_value(cell: &str) -> serde_json::Value {
    if cell.is_empty() {
        return serde_json::Value::Null;
    }
    if let Ok(v) = cell.parse::<i64>() {
        return v.into();
    }
    match cell.parse::<f64>() {
        Ok(v) if v.is_finite() => v.into(),
        _ => cell.into(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::matrix::IdColumn;

    const ICD: &str = "PMBB_ID\tE11\tQ21\tI10
P1\t1\t1\t0
P2\t2\t0\t1
P3\t0\t0\t1
P4\t1\t0\t0
";

    fn icd() -> CodeMatrix {
        CodeMatrix::from_reader(ICD.as_bytes(), b'\t', IdColumn::default()).unwrap()
    }

    fn set(ids: &[&str]) -> BTreeSet<PatientId> {
        ids.iter().map(|&id| id.into()).collect()
    }

    #[test]
    fn sampling() {
        let m = icd();
        // fewer eligible than requested
        let all = sample_patients_with_code(&m, "E11", 10, Some(1), "Q").unwrap();
        assert_eq!(all, vec![ArcStr::from("P1"), "P2".into(), "P4".into()]);

        let two = sample_patients_with_code(&m, "E11", 2, Some(1), "Q").unwrap();
        assert_eq!(two.len(), 2);
        assert!(two.iter().all(|id| all.contains(id)));
        assert_eq!(
            two,
            sample_patients_with_code(&m, "E11", 2, Some(1), "Q").unwrap()
        );

        assert!(sample_patients_with_code(&m, "Q21", 1, Some(1), "Q")
            .unwrap()
            .is_empty());
        assert!(sample_patients_with_code(&m, "Z99", 1, Some(1), "Q")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn id_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sampled_patient_ids.csv");
        save_patient_ids(&["P2".into(), "P1".into()], &path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "PMBB_ID\nP2\nP1\n"
        );
        assert_eq!(
            load_patient_ids(&path).unwrap(),
            vec![ArcStr::from("P2"), "P1".into()]
        );

        fs::write(&path, "PMBB_ID,other\nP3,x\n,y\nP3,z\nP1,w\n").unwrap();
        assert_eq!(
            load_patient_ids(&path).unwrap(),
            vec![ArcStr::from("P3"), "P1".into()]
        );
    }

    #[test]
    fn directory_filter() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::write(input.path().join("icd.txt"), ICD).unwrap();
        fs::write(
            input.path().join("labs.txt"),
            "PMBB_ID\tA1C\nP1\t5.5\nP1\t6.0\nP9\t7.1\n",
        )
        .unwrap();
        fs::write(input.path().join("notes.txt"), "id\tnote\nP1\tx\n").unwrap();
        fs::write(input.path().join("broken.txt"), "PMBB_ID\tx\nP1\t1\nP1\t1\t2\n").unwrap();

        let ids = set(&["P1", "P3"]);
        let unmatched = filter_directory(input.path(), &ids, output.path()).unwrap();
        assert_eq!(unmatched.get("icd.txt"), Some(&0));
        // P1 has two rows, P3 has none
        assert_eq!(unmatched.get("labs.txt"), Some(&1));
        assert!(!unmatched.contains_key("notes.txt"));
        assert!(!unmatched.contains_key("broken.txt"));

        assert_eq!(
            fs::read_to_string(output.path().join("icd.txt")).unwrap(),
            "PMBB_ID\tE11\tQ21\tI10\nP1\t1\t1\t0\nP3\t0\t0\t1\n"
        );
        assert!(!output.path().join("notes.txt").exists());
        // a parse error part way through leaves nothing behind
        assert!(!output.path().join("broken.txt").exists());
        assert!(filter_directory(input.path(), &ids, input.path()).is_err());
    }

    #[test]
    fn codes_per_patient() {
        let m = icd();
        let codes = patient_codes(&m, &["P1".into(), "P2".into(), "P7".into()], "Q");
        assert_eq!(codes[&ArcStr::from("P1")], vec![ArcStr::from("E11")]);
        assert_eq!(
            codes[&ArcStr::from("P2")],
            vec![ArcStr::from("E11"), "I10".into()]
        );
        assert!(codes[&ArcStr::from("P7")].is_empty());
    }

    #[test]
    fn combined_records() {
        let dir = tempfile::tempdir().unwrap();
        let icd = dir.path().join("icd.txt");
        let labs = dir.path().join("labs.txt");
        fs::write(&icd, ICD).unwrap();
        fs::write(&labs, "PMBB_ID\tA1C\tunit\nP1\t5.5\t%\nP1\t6\t%\nP2\t\t%\n").unwrap();

        let records = collect_patient_records(&[icd, labs], &set(&["P1", "P3"])).unwrap();
        assert_eq!(records.len(), 2);
        let p1 = &records[&ArcStr::from("P1")];
        assert_eq!(p1["icd.txt"].len(), 1);
        assert_eq!(p1["icd.txt"][0][&ArcStr::from("E11")], serde_json::json!(1));
        assert_eq!(p1["labs.txt"].len(), 2);
        assert_eq!(p1["labs.txt"][0][&ArcStr::from("A1C")], serde_json::json!(5.5));
        assert_eq!(p1["labs.txt"][1][&ArcStr::from("unit")], serde_json::json!("%"));
        assert!(!p1["labs.txt"][0].contains_key("PMBB_ID"));
        let p3 = &records[&ArcStr::from("P3")];
        assert!(!p3.contains_key("labs.txt"));
    }
}
