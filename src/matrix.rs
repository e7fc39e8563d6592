//! Patient-by-code tables (the PMBB ICD-10 phenotype matrix, the gene variant matrix, ...).
//!
//! Rows are patients, columns are codes or genes and cells are counts or indicators. Missing cells
//! are read as `0`.
use ndarray::{Array2, ArrayView1, Axis};
use qu::ick_use::*;
use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    path::Path,
};

use crate::{
    icd10,
    kg::KnowledgeGraph,
    util::{delimiter_for, parse_count},
    ArcStr, PatientId, ID_COLUMN,
};

/// Which column holds the patient id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdColumn<'a> {
    Named(&'a str),
    /// The first column, whatever it is called.
    First,
}

impl Default for IdColumn<'_> {
    fn default() -> Self {
        IdColumn::Named(ID_COLUMN)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeMatrix {
    id_column: ArcStr,
    ids: Vec<PatientId>,
    columns: Vec<ArcStr>,
    values: Array2<f64>,
    id_idx: BTreeMap<PatientId, usize>,
    col_idx: BTreeMap<ArcStr, usize>,
}

impl CodeMatrix {
    pub fn new(
        id_column: impl Into<ArcStr>,
        ids: Vec<PatientId>,
        columns: Vec<ArcStr>,
        values: Array2<f64>,
    ) -> Result<Self> {
        ensure!(
            values.dim() == (ids.len(), columns.len()),
            "matrix of shape {:?} does not match {} ids and {} columns",
            values.dim(),
            ids.len(),
            columns.len()
        );
        let id_idx = first_positions(&ids);
        ensure!(id_idx.len() == ids.len(), "patient ids are not unique");
        let col_idx = first_positions(&columns);
        Ok(Self {
            id_column: id_column.into(),
            ids,
            columns,
            values,
            id_idx,
            col_idx,
        })
    }

    /// Load a delimited file. `.txt` and `.tsv` files are read as tab separated.
    pub fn load(path: impl AsRef<Path>, id_column: IdColumn) -> Result<Self> {
        fn inner(path: &Path, id_column: IdColumn) -> Result<CodeMatrix> {
            let file = std::fs::File::open(path)?;
            CodeMatrix::from_reader(io::BufReader::new(file), delimiter_for(path), id_column)
        }
        let path = path.as_ref();
        let matrix = inner(path, id_column)
            .with_context(|| format!("loading code matrix from \"{}\"", path.display()))?;
        event!(
            Level::INFO,
            "Loaded \"{}\" with {} patients and {} columns",
            path.display(),
            matrix.nrows(),
            matrix.ncols()
        );
        Ok(matrix)
    }

    pub fn from_reader(rdr: impl io::Read, delimiter: u8, id_column: IdColumn) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(rdr);
        let headers = rdr.headers()?.clone();
        let id_pos = match id_column {
            IdColumn::Named(name) => headers
                .iter()
                .position(|h| h == name)
                .with_context(|| format!("no \"{}\" column", name))?,
            IdColumn::First => {
                ensure!(!headers.is_empty(), "file has no columns");
                0
            }
        };
        let columns: Vec<ArcStr> = headers
            .iter()
            .enumerate()
            .filter(|(pos, _)| *pos != id_pos)
            .map(|(_, h)| h.into())
            .collect();

        let mut ids = vec![];
        let mut seen = BTreeSet::new();
        let mut values = vec![];
        let mut duplicates = 0usize;
        for record in rdr.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let id: PatientId = record
                .get(id_pos)
                .with_context(|| format!("line {}: missing patient id", line))?
                .into();
            if !seen.insert(id.clone()) {
                duplicates += 1;
                continue;
            }
            for (pos, cell) in record.iter().enumerate() {
                if pos != id_pos {
                    values.push(
                        parse_count(cell)
                            .with_context(|| format!("line {}, column {}", line, pos + 1))?,
                    );
                }
            }
            ids.push(id);
        }
        if duplicates > 0 {
            event!(
                Level::WARN,
                "{} rows with a repeated patient id were ignored",
                duplicates
            );
        }

        let values = Array2::from_shape_vec((ids.len(), columns.len()), values)?;
        let id_column = headers.get(id_pos).unwrap_or(ID_COLUMN);
        Self::new(id_column, ids, columns, values)
    }

    /// Write as CSV, with the id column first.
    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        fn inner(this: &CodeMatrix, path: &Path) -> Result {
            let mut writer = csv::Writer::from_writer(crate::create_output(path)?);
            writer.write_record(
                std::iter::once(&*this.id_column).chain(this.columns.iter().map(|c| &**c)),
            )?;
            for (id, row) in this.ids.iter().zip(this.values.outer_iter()) {
                writer.write_record(
                    std::iter::once(id.to_string()).chain(row.iter().map(|v| v.to_string())),
                )?;
            }
            writer.flush()?;
            Ok(())
        }
        let path = path.as_ref();
        inner(self, path).with_context(|| format!("writing code matrix to \"{}\"", path.display()))
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn ids(&self) -> &[PatientId] {
        &self.ids
    }

    pub fn columns(&self) -> &[ArcStr] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.ids.len()
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn has_patient(&self, patient: &str) -> bool {
        self.id_idx.contains_key(patient)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.col_idx.contains_key(column)
    }

    pub fn row(&self, patient: &str) -> Option<ArrayView1<'_, f64>> {
        self.id_idx.get(patient).map(|&row| self.values.row(row))
    }

    pub fn get(&self, patient: &str, column: &str) -> Option<f64> {
        let row = self.id_idx.get(patient)?;
        let col = self.col_idx.get(column)?;
        Some(self.values[(*row, *col)])
    }

    /// Whether the cell is non-zero. A missing patient or column is an error.
    pub fn is_nonzero(&self, patient: &str, column: &str) -> Result<bool> {
        let row = self
            .id_idx
            .get(patient)
            .with_context(|| format!("patient \"{}\" not found in the matrix", patient))?;
        let col = self
            .col_idx
            .get(column)
            .with_context(|| format!("column \"{}\" not found in the matrix", column))?;
        Ok(self.values[(*row, *col)] != 0.)
    }

    /// Patients with a positive value for the code, in row order.
    pub fn patients_with_code(&self, code: &str) -> Result<Vec<PatientId>> {
        let col = *self
            .col_idx
            .get(code)
            .with_context(|| format!("code \"{}\" not found in the matrix", code))?;
        Ok(self
            .ids
            .iter()
            .zip(self.values.column(col))
            .filter(|(_, v)| **v > 0.)
            .map(|(id, _)| id.clone())
            .collect())
    }

    /// The columns where the patient has a non-zero value, skipping excluded codes. `None` if the
    /// patient is not in the matrix.
    pub fn non_zero_codes(&self, patient: &str, exclude_prefix: &str) -> Option<Vec<ArcStr>> {
        let row = self.row(patient)?;
        Some(
            self.columns
                .iter()
                .zip(row)
                .filter(|(code, v)| **v != 0. && !icd10::is_excluded(code, exclude_prefix))
                .map(|(code, _)| code.clone())
                .collect(),
        )
    }

    /// Keep the rows of the given patients, in matrix order.
    pub fn filter_rows(&self, keep: &BTreeSet<PatientId>) -> Self {
        let rows: Vec<usize> = self
            .ids
            .iter()
            .enumerate()
            .filter(|(_, id)| keep.contains(*id))
            .map(|(row, _)| row)
            .collect();
        self.with_rows(&rows)
    }

    fn with_rows(&self, rows: &[usize]) -> Self {
        let ids: Vec<PatientId> = rows.iter().map(|&row| self.ids[row].clone()).collect();
        Self {
            id_column: self.id_column.clone(),
            id_idx: first_positions(&ids),
            ids,
            columns: self.columns.clone(),
            col_idx: self.col_idx.clone(),
            values: self.values.select(Axis(0), rows),
        }
    }

    /// Keep the given columns, renaming each. Takes `(existing name, new name)` pairs.
    pub fn select_columns(&self, columns: &[(ArcStr, ArcStr)]) -> Result<Self> {
        let positions = columns
            .iter()
            .map(|(name, _)| {
                self.col_idx
                    .get(name)
                    .copied()
                    .with_context(|| format!("column \"{}\" not found in the matrix", name))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(
            self.id_column.clone(),
            self.ids.clone(),
            columns.iter().map(|(_, rename)| rename.clone()).collect(),
            self.values.select(Axis(1), &positions),
        )
    }

    /// Keep only the ICD-10 codes present as disease nodes in the knowledge graph.
    ///
    /// Codes are matched after removing periods, and kept columns are renamed to the graph's
    /// spelling of the code, in graph order. Rows can optionally be restricted to a set of
    /// patients.
    pub fn filter_to_kg(
        &self,
        kg: &KnowledgeGraph,
        patients: Option<&BTreeSet<PatientId>>,
    ) -> Result<Self> {
        let mut by_clean: BTreeMap<String, ArcStr> = BTreeMap::new();
        for column in &self.columns {
            by_clean
                .entry(icd10::clean_code(column))
                .or_insert_with(|| column.clone());
        }
        let mut kg_codes = 0;
        let selection: Vec<(ArcStr, ArcStr)> = kg
            .icd10_nodes()
            .inspect(|_| kg_codes += 1)
            .filter_map(|(_, node)| {
                by_clean
                    .get(&icd10::clean_code(&node.key))
                    .map(|column| (column.clone(), node.key.clone()))
            })
            .collect();
        event!(
            Level::INFO,
            "{} of {} KG ICD-10 codes found among {} matrix columns",
            selection.len(),
            kg_codes,
            self.ncols()
        );

        let filtered = self.select_columns(&selection)?;
        Ok(match patients {
            Some(keep) => filtered.filter_rows(keep),
            None => filtered,
        })
    }
}

/// Map each value to the position of its first occurrence.
fn first_positions(values: &[ArcStr]) -> BTreeMap<ArcStr, usize> {
    let mut idx = BTreeMap::new();
    for (pos, value) in values.iter().enumerate() {
        idx.entry(value.clone()).or_insert(pos);
    }
    idx
}

#[cfg(test)]
mod test {
    use super::*;

    const ICD: &str = "PMBB_ID\tA01.1\tE11\tQ21.1\tC50.9
P1\t1\t0\t2\tNA
P2\t0\t3\t\t0
P3\t0\t0\t0\t1
P2\t9\t9\t9\t9
";

    fn icd() -> CodeMatrix {
        CodeMatrix::from_reader(ICD.as_bytes(), b'\t', IdColumn::default()).unwrap()
    }

    #[test]
    fn parse_tsv() {
        let m = icd();
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 4);
        assert_eq!(m.id_column(), "PMBB_ID");
        // first row for a repeated id wins
        assert_eq!(m.get("P2", "E11"), Some(3.));
        // missing cells are 0
        assert_eq!(m.get("P1", "C50.9"), Some(0.));
        assert_eq!(m.get("P2", "Q21.1"), Some(0.));
        assert_eq!(m.get("P4", "E11"), None);
        assert!(m.is_nonzero("P1", "A01.1").unwrap());
        assert!(m.is_nonzero("P4", "A01.1").is_err());
        assert!(m.is_nonzero("P1", "BRCA1").is_err());
    }

    #[test]
    fn first_column_ids() {
        let csv = "sample,BRCA1,TP53\nP1,1,0\nP2,0,0\n";
        let m = CodeMatrix::from_reader(csv.as_bytes(), b',', IdColumn::First).unwrap();
        assert_eq!(m.id_column(), "sample");
        assert_eq!(m.columns(), &[ArcStr::from("BRCA1"), "TP53".into()]);
        assert!(CodeMatrix::from_reader(csv.as_bytes(), b',', IdColumn::default()).is_err());
        let bad = "sample,BRCA1\nP1,yes\n";
        assert!(CodeMatrix::from_reader(bad.as_bytes(), b',', IdColumn::First).is_err());
    }

    #[test]
    fn code_queries() {
        let m = icd();
        assert_eq!(m.patients_with_code("A01.1").unwrap(), vec![ArcStr::from("P1")]);
        assert!(m.patients_with_code("Z99").is_err());
        assert_eq!(
            m.non_zero_codes("P1", "Q").unwrap(),
            vec![ArcStr::from("A01.1")]
        );
        assert_eq!(m.non_zero_codes("P1", "").unwrap().len(), 2);
        assert!(m.non_zero_codes("P9", "Q").is_none());
    }

    #[test]
    fn filter_to_graph() {
        let kg = KnowledgeGraph::from_gml_str(
            r#"graph [
  node [ id 0 label "E11" type "disease" ]
  node [ id 1 label "A011" type "disease" ]
  node [ id 2 label "Z00" type "disease" ]
  node [ id 3 label "BRCA1" type "gene/protein" ]
]"#,
        )
        .unwrap();
        let m = icd();
        let filtered = m.filter_to_kg(&kg, None).unwrap();
        assert_eq!(filtered.columns(), &[ArcStr::from("E11"), "A011".into()]);
        assert_eq!(filtered.get("P1", "A011"), Some(1.));
        assert_eq!(filtered.nrows(), 3);

        let keep = BTreeSet::from([ArcStr::from("P3"), "P1".into(), "P7".into()]);
        let filtered = m.filter_to_kg(&kg, Some(&keep)).unwrap();
        assert_eq!(filtered.ids(), &[ArcStr::from("P1"), "P3".into()]);
    }

    #[test]
    fn save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filtered_icd10_matrix.csv");
        let m = icd();
        m.save(&path).unwrap();
        assert_eq!(CodeMatrix::load(&path, IdColumn::default()).unwrap(), m);
    }
}
