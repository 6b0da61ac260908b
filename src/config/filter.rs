//! Dataset filters.
//!
//! A filter is either `project.*` (every dataset of the project) or an exact
//! `project.dataset`. Any other `*` is literal text, so `proj.sales_*` only
//! matches a dataset named `sales_*`. Matching is case-sensitive. An empty filter list admits
//! everything; otherwise a dataset must match at least one filter.

use std::fmt;
use std::str::FromStr;

use super::SettingsError;

/// One parsed dataset filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFilter {
    project: String,
    /// `None` for `project.*`.
    dataset: Option<String>,
}

impl DatasetFilter {
    pub fn matches(&self, project_id: &str, dataset_id: &str) -> bool {
        self.project == project_id
            && self
                .dataset
                .as_deref()
                .map_or(true, |dataset| dataset == dataset_id)
    }

    pub fn project(&self) -> &str {
        &self.project
    }
}

impl FromStr for DatasetFilter {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| {
            SettingsError::InvalidConfig(format!("dataset filter '{s}': {why}"))
        };

        let trimmed = s.trim();
        // Dataset ids never contain dots; domain-scoped project ids can.
        let (project, dataset) = trimmed
            .rsplit_once('.')
            .ok_or_else(|| invalid("expected project.dataset or project.*"))?;

        if project.is_empty() || dataset.is_empty() {
            return Err(invalid("empty project or dataset"));
        }

        let dataset = (dataset != "*").then(|| dataset.to_string());

        Ok(Self {
            project: project.to_string(),
            dataset,
        })
    }
}

impl fmt::Display for DatasetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dataset {
            Some(dataset) => write!(f, "{}.{}", self.project, dataset),
            None => write!(f, "{}.*", self.project),
        }
    }
}

/// Whether `project.dataset` passes the filter list.
pub fn dataset_allowed(filters: &[DatasetFilter], project_id: &str, dataset_id: &str) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.matches(project_id, dataset_id))
}

/// Parse a list of filter strings, skipping blanks.
pub fn parse_filters<S: AsRef<str>>(raw: &[S]) -> Result<Vec<DatasetFilter>, SettingsError> {
    raw.iter()
        .map(AsRef::as_ref)
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}
