//! Operation-level profiling session.
//!
//! A [`Profiler`] is configured once, then toggled between [`ProfilerState::Stopped`]
//! and [`ProfilerState::Running`] any number of times. Only operations executed
//! while running are recorded, both as individual trace events and as per-name
//! aggregates.

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(thiserror::Error, Debug)]
pub enum ProfilerError {
    #[error("the profiler cannot be reconfigured while it is running")]
    ConfigureWhileRunning,
    #[error("aggregate statistics are disabled, enable `aggregate_stats` in the profiler config")]
    AggregateStatsDisabled,
    #[error("failed to write the profile to {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize the profile")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfilerState {
    #[default]
    Stopped,
    Running,
}

/// Kind of work a recorded operation belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Layer computations and the loss.
    Forward,
    /// Gradient computation.
    Backward,
    /// Parameter updates.
    Update,
    /// Tensor relocation between devices.
    Transfer,
}

impl Category {
    pub fn name(&self) -> &'static str {
        match self {
            Category::Forward => "forward",
            Category::Backward => "backward",
            Category::Update => "update",
            Category::Transfer => "transfer",
        }
    }
}

#[derive(Config, Debug)]
pub struct ProfilerConfig {
    /// Record every category, ignoring `categories`.
    #[config(default = false)]
    pub profile_all: bool,
    #[config(default = "vec![Category::Forward, Category::Backward]")]
    pub categories: Vec<Category>,
    /// Keep per-operation aggregates, required by [`Profiler::dumps`].
    #[config(default = false)]
    pub aggregate_stats: bool,
    /// Destination of [`Profiler::dump`].
    #[config(default = "String::from(\"profile_output.json\")")]
    pub filename: String,
    /// Wait for the device after each recorded operation, so that timings
    /// cover the execution and not only the dispatch.
    #[config(default = true)]
    pub sync_ops: bool,
}

impl ProfilerConfig {
    pub fn records(&self, category: Category) -> bool {
        self.profile_all || self.categories.contains(&category)
    }
}

/// One recorded operation, in the Chrome trace "complete event" layout.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProfileEvent {
    pub name: String,
    #[serde(rename = "cat")]
    pub category: Category,
    /// Event phase, always `"X"`.
    pub ph: &'static str,
    /// Start, in microseconds since the profiler creation.
    #[serde(rename = "ts")]
    pub start_us: u64,
    #[serde(rename = "dur")]
    pub duration_us: u64,
    pub pid: u32,
    pub tid: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OpStats {
    pub count: usize,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl OpStats {
    fn new(elapsed: Duration) -> Self {
        Self {
            count: 1,
            total: elapsed,
            min: elapsed,
            max: elapsed,
        }
    }

    fn add(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.min = self.min.min(elapsed);
        self.max = self.max.max(elapsed);
    }

    pub fn avg(&self) -> Duration {
        self.total / self.count as u32
    }
}

/// Aggregated statistics, grouped by category then by operation name.
pub type Aggregate = BTreeMap<Category, BTreeMap<String, OpStats>>;

#[derive(Serialize)]
struct AggregateEntry<'a> {
    category: Category,
    name: &'a str,
    count: usize,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
    avg_ms: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceFile<'a> {
    trace_events: &'a [ProfileEvent],
    display_time_unit: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    aggregate_stats: Option<Vec<AggregateEntry<'a>>>,
}

/// Scoped recording of operations.
pub trait Tracer {
    fn trace<T>(&mut self, name: &str, category: Category, op: impl FnOnce() -> T) -> T;
}

/// Runs every operation without recording anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTrace;

impl Tracer for NoTrace {
    fn trace<T>(&mut self, _name: &str, _category: Category, op: impl FnOnce() -> T) -> T {
        op()
    }
}

#[derive(Debug)]
pub struct Profiler {
    config: ProfilerConfig,
    state: ProfilerState,
    origin: Instant,
    last_started_at: Option<Instant>,
    last_stopped_at: Option<Instant>,
    events: Vec<ProfileEvent>,
    aggregate: Aggregate,
}

impl Profiler {
    pub fn new(config: ProfilerConfig) -> Self {
        Self {
            config,
            state: ProfilerState::Stopped,
            origin: Instant::now(),
            last_started_at: None,
            last_stopped_at: None,
            events: Vec::new(),
            aggregate: Aggregate::new(),
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Replaces the configuration. Recorded data is kept.
    pub fn configure(&mut self, config: ProfilerConfig) -> Result<(), ProfilerError> {
        if self.is_running() {
            return Err(ProfilerError::ConfigureWhileRunning);
        }
        self.config = config;
        Ok(())
    }

    pub fn state(&self) -> ProfilerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ProfilerState::Running
    }

    /// Moves to `state`. Setting the current state again changes nothing.
    pub fn set_state(&mut self, state: ProfilerState) {
        if self.state == state {
            tracing::debug!("profiler already {state:?}");
            return;
        }
        match state {
            ProfilerState::Running => self.last_started_at = Some(Instant::now()),
            ProfilerState::Stopped => self.last_stopped_at = Some(Instant::now()),
        }
        tracing::debug!("profiler {:?} -> {state:?}", self.state);
        self.state = state;
    }

    pub fn start(&mut self) {
        self.set_state(ProfilerState::Running)
    }

    pub fn stop(&mut self) {
        self.set_state(ProfilerState::Stopped)
    }

    /// When the profiler last went from stopped to running.
    pub fn last_started_at(&self) -> Option<Instant> {
        self.last_started_at
    }

    /// When the profiler last went from running to stopped.
    pub fn last_stopped_at(&self) -> Option<Instant> {
        self.last_stopped_at
    }

    /// Runs `op`, recording its wall time if the profiler is running and
    /// `category` is enabled.
    pub fn record<T>(&mut self, name: &str, category: Category, op: impl FnOnce() -> T) -> T {
        if !self.is_running() || !self.config.records(category) {
            return op();
        }
        let start = Instant::now();
        let output = op();
        let elapsed = start.elapsed();
        self.push(name, category, start, elapsed);
        output
    }

    fn push(&mut self, name: &str, category: Category, start: Instant, elapsed: Duration) {
        self.events.push(ProfileEvent {
            name: name.to_string(),
            category,
            ph: "X",
            start_us: start.duration_since(self.origin).as_micros() as u64,
            duration_us: elapsed.as_micros() as u64,
            pid: std::process::id(),
            tid: 0,
        });
        if self.config.aggregate_stats {
            self.aggregate
                .entry(category)
                .or_default()
                .entry(name.to_string())
                .and_modify(|stats| stats.add(elapsed))
                .or_insert_with(|| OpStats::new(elapsed));
        }
    }

    pub fn events(&self) -> &[ProfileEvent] {
        &self.events
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    /// Drops every recorded event and aggregate.
    pub fn reset(&mut self) {
        self.events.clear();
        self.aggregate.clear();
    }

    /// Renders the aggregated statistics as a table.
    ///
    /// Rendering does not consume anything: calling this twice without
    /// recording in between yields the same text. With `reset`, the
    /// aggregates are cleared afterwards (trace events are kept).
    pub fn dumps(&mut self, reset: bool) -> Result<String, ProfilerError> {
        if !self.config.aggregate_stats {
            return Err(ProfilerError::AggregateStatsDisabled);
        }
        let table = render_table(&self.aggregate);
        if reset {
            self.aggregate.clear();
        }
        Ok(table)
    }

    /// Writes the trace events (and the aggregates, when enabled) as JSON to
    /// the configured file, overwriting it.
    ///
    /// With `finished`, the trace events are cleared after being written.
    pub fn dump(&mut self, finished: bool) -> Result<PathBuf, ProfilerError> {
        let path = PathBuf::from(&self.config.filename);
        self.dump_to(&path)?;
        if finished {
            self.events.clear();
        }
        Ok(path)
    }

    fn dump_to(&self, path: &Path) -> Result<(), ProfilerError> {
        let aggregate_stats = self
            .config
            .aggregate_stats
            .then(|| aggregate_entries(&self.aggregate));
        let file = TraceFile {
            trace_events: &self.events,
            display_time_unit: "ms",
            aggregate_stats,
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(path, json).map_err(|source| ProfilerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("profile written to {path:?}");
        Ok(())
    }
}

impl Tracer for Profiler {
    fn trace<T>(&mut self, name: &str, category: Category, op: impl FnOnce() -> T) -> T {
        self.record(name, category, op)
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1e3
}

fn aggregate_entries(aggregate: &Aggregate) -> Vec<AggregateEntry<'_>> {
    aggregate
        .iter()
        .flat_map(|(category, ops)| {
            ops.iter().map(|(name, stats)| AggregateEntry {
                category: *category,
                name,
                count: stats.count,
                total_ms: millis(stats.total),
                min_ms: millis(stats.min),
                max_ms: millis(stats.max),
                avg_ms: millis(stats.avg()),
            })
        })
        .collect()
}

fn render_table(aggregate: &Aggregate) -> String {
    let mut out = String::new();
    out.push_str("\nProfile Statistics:\n");
    out.push_str("\tNote that times are host wall-clock times, in milliseconds.\n");
    for (category, ops) in aggregate {
        let _ = writeln!(out, "{}", category.name());
        let _ = writeln!(out, "=================");
        let _ = writeln!(
            out,
            "{:<32}{:>12}{:>16}{:>16}{:>16}{:>16}",
            "Name", "Total Count", "Time (ms)", "Min Time (ms)", "Max Time (ms)", "Avg Time (ms)"
        );
        let _ = writeln!(
            out,
            "{:<32}{:>12}{:>16}{:>16}{:>16}{:>16}",
            "----", "-----------", "---------", "-------------", "-------------", "-------------"
        );
        for (name, stats) in ops {
            let _ = writeln!(
                out,
                "{:<32}{:>12}{:>16.4}{:>16.4}{:>16.4}{:>16.4}",
                name,
                stats.count,
                millis(stats.total),
                millis(stats.min),
                millis(stats.max),
                millis(stats.avg()),
            );
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregating() -> ProfilerConfig {
        ProfilerConfig::new()
            .with_profile_all(true)
            .with_aggregate_stats(true)
    }

    #[test]
    fn toggling_is_total() {
        let mut profiler = Profiler::new(ProfilerConfig::new());
        assert_eq!(profiler.state(), ProfilerState::Stopped);
        profiler.set_state(ProfilerState::Running);
        assert_eq!(profiler.state(), ProfilerState::Running);
        profiler.start();
        assert!(profiler.is_running());
        profiler.set_state(ProfilerState::Stopped);
        assert_eq!(profiler.state(), ProfilerState::Stopped);
        let stopped_at = profiler.last_stopped_at().unwrap();
        // stopping twice keeps the first stop instant
        profiler.stop();
        assert_eq!(profiler.last_stopped_at(), Some(stopped_at));
    }

    #[test]
    fn records_only_while_running() {
        let mut profiler = Profiler::new(aggregating());
        assert_eq!(profiler.record("warmup", Category::Forward, || 1), 1);
        assert!(profiler.events().is_empty());

        profiler.start();
        assert_eq!(profiler.record("tracked", Category::Forward, || 2), 2);
        profiler.stop();
        profiler.record("after", Category::Forward, || ());

        let names: Vec<_> = profiler.events().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["tracked"]);
        let forward = &profiler.aggregate()[&Category::Forward];
        assert_eq!(forward.len(), 1);
        assert_eq!(forward["tracked"].count, 1);
    }

    #[test]
    fn disabled_categories_are_skipped() {
        let config = ProfilerConfig::new().with_categories(vec![Category::Backward]);
        let mut profiler = Profiler::new(config);
        profiler.start();
        profiler.record("conv", Category::Forward, || ());
        profiler.record("grad", Category::Backward, || ());
        let categories: Vec<_> = profiler.events().iter().map(|e| e.category).collect();
        assert_eq!(categories, [Category::Backward]);
    }

    #[test]
    fn aggregates_repeated_ops() {
        let mut profiler = Profiler::new(aggregating());
        profiler.start();
        for _ in 0..3 {
            profiler.record("relu", Category::Forward, || {
                std::thread::sleep(Duration::from_millis(1))
            });
        }
        let stats = profiler.aggregate()[&Category::Forward]["relu"];
        assert_eq!(stats.count, 3);
        assert!(stats.min <= stats.avg() && stats.avg() <= stats.max);
        assert!(stats.total >= Duration::from_millis(3));
    }

    #[test]
    fn configure_is_rejected_while_running() {
        let mut profiler = Profiler::new(ProfilerConfig::new());
        profiler.start();
        assert!(matches!(
            profiler.configure(aggregating()),
            Err(ProfilerError::ConfigureWhileRunning)
        ));
        profiler.stop();
        profiler.configure(aggregating()).unwrap();
        assert!(profiler.config().aggregate_stats);
    }

    #[test]
    fn dumps_requires_aggregate_stats() {
        let mut profiler = Profiler::new(ProfilerConfig::new());
        assert!(matches!(
            profiler.dumps(false),
            Err(ProfilerError::AggregateStatsDisabled)
        ));
    }

    #[test]
    fn dumps_is_idempotent_until_reset() {
        let mut profiler = Profiler::new(aggregating());
        profiler.start();
        profiler.record("conv1::Conv2d", Category::Forward, || ());
        profiler.stop();

        let first = profiler.dumps(false).unwrap();
        assert!(first.contains("conv1::Conv2d"));
        assert_eq!(first, profiler.dumps(false).unwrap());

        let last = profiler.dumps(true).unwrap();
        assert_eq!(first, last);
        assert!(!profiler.dumps(false).unwrap().contains("conv1::Conv2d"));
        // trace events survive an aggregate reset
        assert_eq!(profiler.events().len(), 1);
    }

    #[test]
    fn dump_writes_chrome_trace() {
        let path = std::env::temp_dir().join(format!(
            "burn-lenet-profiler-dump-{}.json",
            std::process::id()
        ));
        let config = aggregating().with_filename(path.to_string_lossy().into_owned());
        let mut profiler = Profiler::new(config);
        profiler.start();
        profiler.record("autodiff::Backward", Category::Backward, || ());
        profiler.stop();

        assert_eq!(profiler.dump(false).unwrap(), path);
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["displayTimeUnit"], "ms");
        assert_eq!(json["traceEvents"][0]["name"], "autodiff::Backward");
        assert_eq!(json["traceEvents"][0]["ph"], "X");
        assert_eq!(json["aggregateStats"][0]["count"], 1);

        profiler.dump(true).unwrap();
        assert!(profiler.events().is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn reset_clears_everything() {
        let mut profiler = Profiler::new(aggregating());
        profiler.start();
        profiler.record("a", Category::Update, || ());
        profiler.reset();
        assert!(profiler.events().is_empty());
        assert!(profiler.aggregate().is_empty());
        assert!(profiler.is_running());
    }
}
