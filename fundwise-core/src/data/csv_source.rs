//! Local CSV drop directory as an upstream source.
//!
//! Layout: `{root}/{endpoint}/{subject}.csv`. A missing file is an empty
//! result, not an error; an unreadable directory root is `UpstreamUnavailable`.

use std::fs::File;
use std::path::{Path, PathBuf};

use super::provider::{DataError, FetchRequest, UpstreamSource};
use super::snapshot::sanitize_key;
use super::table::Table;

pub struct CsvDirSource {
    name: String,
    root: PathBuf,
}

impl CsvDirSource {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, request: &FetchRequest) -> PathBuf {
        self.root
            .join(&request.endpoint)
            .join(format!("{}.csv", sanitize_key(&request.subject)))
    }
}

impl UpstreamSource for CsvDirSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Table, DataError> {
        if !self.root.is_dir() {
            return Err(DataError::unavailable(
                &self.name,
                format!("source root {} is not a directory", self.root.display()),
            ));
        }

        let path = self.path_for(request);
        if !path.exists() {
            return Ok(Table::default());
        }

        let file = File::open(&path)
            .map_err(|e| DataError::unavailable(&self.name, format!("{}: {e}", path.display())))?;
        let mut table = Table::from_csv_reader(file).map_err(|e| DataError::SchemaDrift {
            dataset: request.endpoint.clone(),
            missing: vec![format!("unparseable csv ({e})")],
        })?;

        // Range filtering is best-effort: rows whose first column is not a date stay.
        if let (Some(range), Some(date_idx)) = (request.range, table.column_index("date")) {
            table.rows.retain(|row| {
                match row.get(date_idx).and_then(|c| super::schema::parse_date(&c.to_string())) {
                    Some(d) => range.contains(d),
                    None => true,
                }
            });
        }
        Ok(table)
    }
}
