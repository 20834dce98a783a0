use std::collections::HashMap;

use downsampler_storage::DownsamplingQuery;

use super::{JobMode, StreamJob};

/// Structured form of a job name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamJobName {
    pub mode: JobMode,
    pub query_id: String,
    pub db: String,
    pub measurement: String,
    pub interval: u32,
}

impl StreamJobName {
    /// Name for a job running `query`. `mode` must be a concrete mode.
    pub fn for_query(query: &DownsamplingQuery, mode: JobMode) -> Self {
        Self {
            mode,
            query_id: query.query_id.clone(),
            db: query.db.clone(),
            measurement: query.measurement.clone(),
            interval: query.interval,
        }
    }

    /// Parse `<mode>:<queryId>:<db>:<measurement>:<interval>`.
    ///
    /// Measurements may themselves contain `:`; everything between the db and
    /// the trailing interval is the measurement.
    pub fn parse(name: &str) -> Option<Self> {
        let parts: Vec<&str> = name.split(':').collect();
        if parts.len() < 5 {
            return None;
        }

        let mode = match parts[0] {
            "downsample" => JobMode::Actual,
            "simulate" => JobMode::Simulation,
            _ => return None,
        };
        let last = parts.len() - 1;
        let interval = parts[last].parse().ok()?;

        Some(Self {
            mode,
            query_id: parts[1].to_string(),
            db: parts[2].to_string(),
            measurement: parts[3..last].join(":"),
            interval,
        })
    }
}

impl std::fmt::Display for StreamJobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.mode.prefix(),
            self.query_id,
            self.db,
            self.measurement,
            self.interval
        )
    }
}

/// One cluster listing grouped by query id
///
/// Lookups hit the parsed index first. Names that do not parse stay
/// reachable through the substring rule, so answers equal a plain scan.
pub struct JobIndex {
    jobs: Vec<StreamJob>,
    by_query: HashMap<String, Vec<usize>>,
}

impl JobIndex {
    pub fn new(jobs: Vec<StreamJob>) -> Self {
        let mut by_query: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, job) in jobs.iter().enumerate() {
            if let Some(name) = StreamJobName::parse(&job.name) {
                by_query.entry(name.query_id).or_default().push(i);
            }
        }
        Self { jobs, by_query }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs whose parsed name carries exactly `query_id`.
    pub fn for_query(&self, query_id: &str) -> impl Iterator<Item = &StreamJob> {
        self.by_query
            .get(query_id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.jobs[i])
    }

    pub fn has_active(&self, query_id: &str, mode: JobMode) -> bool {
        if self
            .for_query(query_id)
            .any(|job| job.name.starts_with(mode.prefix()))
        {
            return true;
        }
        self.jobs.iter().any(|job| mode.matches(&job.name, query_id))
    }

    /// Every job matching `query_id` under `mode`, by the substring rule.
    pub fn matching(&self, query_id: &str, mode: JobMode) -> Vec<&StreamJob> {
        self.jobs
            .iter()
            .filter(|job| mode.matches(&job.name, query_id))
            .collect()
    }
}
