use std::collections::HashSet;
use std::path::Path;

use fo_types::{DataError, FoResult};
use tracing::{debug, info, warn};

/// Ordered, de-duplicated list of partition identifiers to fan out over.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionCatalog {
    ids: Vec<String>,
}

impl PartitionCatalog {
    /// Build from ids in the given order; later duplicates and blank ids are
    /// dropped.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let ids = ids
            .into_iter()
            .map(Into::into)
            .map(|id: String| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Self { ids }
    }

    /// Read partition ids from one column of a CSV file with headers.
    pub fn from_csv<P: AsRef<Path>>(path: P, column: &str) -> FoResult<Self> {
        use csv::ReaderBuilder;

        let path = path.as_ref();
        info!("Loading partition ids from: {}", path.display());

        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(DataError::from)?;

        let headers = rdr.headers().map_err(DataError::from)?.clone();
        debug!("CSV headers: {:?}", headers);

        let column_idx = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(column))
            .ok_or_else(|| DataError::ColumnNotFound {
                column: column.to_string(),
                path: path.display().to_string(),
            })?;

        let mut raw = Vec::new();
        for (line_num, result) in rdr.records().enumerate() {
            match result {
                Ok(record) => match record.get(column_idx) {
                    Some(value) => raw.push(value.to_string()),
                    None => warn!("Skipping short record at line {}", line_num + 2),
                },
                Err(e) => warn!("Skipping invalid record at line {}: {}", line_num + 2, e),
            }
        }

        let catalog = Self::from_ids(raw);
        info!("Loaded {} partition ids", catalog.len());
        Ok(catalog)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn into_ids(self) -> Vec<String> {
        self.ids
    }
}
