use crate::error::StoreError;

/// Fixed components of one run's partition paths. `day` is derived once from
/// the run's start wall time and never re-read, so a run that crosses
/// midnight stays in one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub dataset: String,
    pub source: String,
    pub category: String,
    pub day: String,
    pub run_id: String,
}

impl PartitionSpec {
    /// Builds and validates a partition spec. Key components become path
    /// segments, so separators and `=` are refused up front.
    pub fn new(
        dataset: impl Into<String>,
        source: impl Into<String>,
        category: impl Into<String>,
        run_id: impl Into<String>,
        start_millis: u64,
    ) -> Result<Self, StoreError> {
        let spec = PartitionSpec {
            dataset: dataset.into(),
            source: source.into(),
            category: category.into(),
            day: quarry_systemtime::day_from_millis(start_millis),
            run_id: run_id.into(),
        };
        for (name, value) in [
            ("dataset", &spec.dataset),
            ("source", &spec.source),
            ("category", &spec.category),
            ("run_id", &spec.run_id),
        ] {
            if value.is_empty() {
                return Err(StoreError::Config(format!("{name} must not be empty")));
            }
            if value.contains(['/', '\\', '=']) {
                return Err(StoreError::Config(format!(
                    "{name} {value:?} must not contain '/', '\\' or '='"
                )));
            }
        }
        Ok(spec)
    }

    fn run_prefix(&self) -> String {
        format!(
            "datasets/{}/partitions/source={}/category={}/day={}/run_id={}",
            self.dataset, self.source, self.category, self.day, self.run_id
        )
    }

    /// Directory for one event-type partition.
    pub fn event_dir(&self, event_type: &str) -> String {
        format!("{}/event_type={}/", self.run_prefix(), event_type)
    }

    /// Key of one sidecar file.
    pub fn file_path(&self, filename: &str) -> String {
        format!("{}/files/{}", self.run_prefix(), filename)
    }
}
