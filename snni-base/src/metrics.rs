//! Timing, CPU and traffic accounting of dispatched operations.
//!
//! Exactly one computation thread per party touches the recorder, so it is a
//! plain owned value threaded through the dispatcher.
use crate::constants::BYTES_PER_MIB;
use crate::errors::Result;
use crate::party::PartyRole;
use crate::protocol::CommCounters;

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// Bucket that a dispatched operation books its time and traffic to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpCategory {
    MatMul,
    Conv,
    Relu,
    Truncation,
    MaxPool,
    AvgPool,
    ArgMax,
    ElemWiseSecretMult,
    ElemWiseActModelMult,
}

impl OpCategory {
    pub const ALL: [OpCategory; 9] = [
        OpCategory::MatMul,
        OpCategory::Conv,
        OpCategory::Relu,
        OpCategory::Truncation,
        OpCategory::MaxPool,
        OpCategory::AvgPool,
        OpCategory::ArgMax,
        OpCategory::ElemWiseSecretMult,
        OpCategory::ElemWiseActModelMult,
    ];
}

impl fmt::Display for OpCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Source of the process CPU time.
pub trait CpuClock: fmt::Debug {
    /// User plus system time consumed by this process so far, in clock ticks.
    fn process_ticks(&self) -> Result<u64>;

    fn ticks_per_second(&self) -> u64;
}

/// Reads the per-process accounting record of the Linux `/proc` filesystem.
#[derive(Debug)]
pub struct ProcStatClock {
    ticks_per_second: u64,
}

#[cfg(unix)]
fn system_ticks_per_second() -> u64 {
    // SAFETY: sysconf only reads a system constant.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

#[cfg(not(unix))]
fn system_ticks_per_second() -> u64 {
    100
}

impl ProcStatClock {
    pub fn new() -> Self {
        ProcStatClock {
            ticks_per_second: system_ticks_per_second(),
        }
    }
}

impl Default for ProcStatClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts `utime + stime` (fields 14 and 15) from a `/proc/<pid>/stat` line.
pub(crate) fn parse_proc_stat(line: &str) -> Result<u64> {
    // The command name (field 2) is parenthesized and may contain spaces.
    let after_name = line
        .rfind(')')
        .map(|pos| &line[pos + 1..])
        .ok_or_else(|| runtime_error!("Malformed process stat record: {}", line))?;
    let fields: Vec<&str> = after_name.split_whitespace().collect();
    // fields[0] is field 3 (state).
    if fields.len() < 13 {
        return Err(runtime_error!("Truncated process stat record: {}", line));
    }
    let utime: u64 = fields[11].parse()?;
    let stime: u64 = fields[12].parse()?;
    Ok(utime + stime)
}

impl CpuClock for ProcStatClock {
    fn process_ticks(&self) -> Result<u64> {
        let stat = std::fs::read_to_string("/proc/self/stat")?;
        parse_proc_stat(&stat)
    }

    fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }
}

/// `(cpu / (wall * cores)) * 100`, not clamped. Zero for an empty wall interval.
pub fn cpu_utilization(cpu_seconds: f64, wall_seconds: f64, cores: usize) -> f64 {
    if wall_seconds <= 0.0 {
        return 0.0;
    }
    cpu_seconds / (wall_seconds * cores as f64) * 100.0
}

/// Measurements taken right before a dispatched call.
#[derive(Clone, Copy, Debug)]
pub struct Segment {
    wall_start: Instant,
    cpu_ticks: u64,
    counters: CommCounters,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OperationMetric {
    pub op: &'static str,
    pub category: Option<OpCategory>,
    pub wall_time: f64,
    pub cpu_time: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub cpu_usage: f64,
}

/// Cumulative time and traffic of one category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub time: f64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub calls: u64,
}

#[derive(Debug)]
pub struct MetricsRecorder {
    clock: Box<dyn CpuClock>,
    cores: usize,
    run_start: Option<(Instant, u64)>,
    totals: BTreeMap<OpCategory, CategoryTotals>,
    cpu_usage_samples: Vec<f64>,
    peak_cpu_usage: f64,
}

impl MetricsRecorder {
    pub fn new(clock: Box<dyn CpuClock>, cores: usize) -> Self {
        MetricsRecorder {
            clock,
            cores: cores.max(1),
            run_start: None,
            totals: BTreeMap::new(),
            cpu_usage_samples: vec![],
            peak_cpu_usage: 0.0,
        }
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    /// Records the wall and CPU baselines of the run.
    pub fn mark_run_start(&mut self) -> Result<()> {
        self.run_start = Some((Instant::now(), self.clock.process_ticks()?));
        Ok(())
    }

    pub fn begin(&self, counters: CommCounters) -> Result<Segment> {
        Ok(Segment {
            wall_start: Instant::now(),
            cpu_ticks: self.clock.process_ticks()?,
            counters,
        })
    }

    fn ticks_to_seconds(&self, ticks: u64) -> f64 {
        ticks as f64 / self.clock.ticks_per_second() as f64
    }

    /// Closes `segment`, books it to `category` and appends its CPU usage sample.
    pub fn finish(
        &mut self,
        segment: Segment,
        op: &'static str,
        category: Option<OpCategory>,
        counters: CommCounters,
    ) -> Result<OperationMetric> {
        let wall_time = segment.wall_start.elapsed().as_secs_f64();
        let cpu_ticks = self.clock.process_ticks()?;
        let cpu_time = self.ticks_to_seconds(cpu_ticks.saturating_sub(segment.cpu_ticks));
        let traffic = counters.since(&segment.counters);
        let metric = OperationMetric {
            op,
            category,
            wall_time,
            cpu_time,
            bytes_sent: traffic.bytes_sent,
            bytes_received: traffic.bytes_received,
            cpu_usage: cpu_utilization(cpu_time, wall_time, self.cores),
        };
        self.book(&metric);
        info!("cpu usage {}: {:.2} %", op, metric.cpu_usage);
        Ok(metric)
    }

    fn book(&mut self, metric: &OperationMetric) {
        if let Some(category) = metric.category {
            let totals = self.totals.entry(category).or_default();
            totals.time += metric.wall_time;
            totals.bytes_sent += metric.bytes_sent;
            totals.bytes_received += metric.bytes_received;
            totals.calls += 1;
        }
        self.cpu_usage_samples.push(metric.cpu_usage);
        self.peak_cpu_usage = self.peak_cpu_usage.max(metric.cpu_usage);
    }

    pub fn totals(&self, category: OpCategory) -> CategoryTotals {
        self.totals.get(&category).copied().unwrap_or_default()
    }

    pub fn cpu_usage_samples(&self) -> &[f64] {
        &self.cpu_usage_samples
    }

    pub fn peak_cpu_usage(&self) -> f64 {
        self.peak_cpu_usage
    }

    /// Mean of all per-operation samples, 0 before the first sample.
    pub fn mean_cpu_usage(&self) -> f64 {
        if self.cpu_usage_samples.is_empty() {
            return 0.0;
        }
        self.cpu_usage_samples.iter().sum::<f64>() / self.cpu_usage_samples.len() as f64
    }

    pub fn summarize(&self, party: PartyRole, counters: CommCounters) -> Result<RunSummary> {
        let (elapsed_wall_time, elapsed_cpu_time) = match self.run_start {
            Some((wall, ticks)) => (
                wall.elapsed().as_secs_f64(),
                self.ticks_to_seconds(self.clock.process_ticks()?.saturating_sub(ticks)),
            ),
            None => (0.0, 0.0),
        };
        let categories = OpCategory::ALL
            .iter()
            .map(|category| (*category, self.totals(*category)))
            .collect();
        Ok(RunSummary {
            party,
            cores: self.cores,
            elapsed_wall_time,
            elapsed_cpu_time,
            cpu_usage: cpu_utilization(elapsed_cpu_time, elapsed_wall_time, self.cores),
            mean_cpu_usage: self.mean_cpu_usage(),
            peak_cpu_usage: self.peak_cpu_usage,
            samples: self.cpu_usage_samples.len(),
            bytes_sent: counters.bytes_sent,
            bytes_received: counters.bytes_received,
            categories,
        })
    }
}

/// End-of-run report of one party.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub party: PartyRole,
    pub cores: usize,
    pub elapsed_wall_time: f64,
    pub elapsed_cpu_time: f64,
    /// CPU usage over the whole run.
    pub cpu_usage: f64,
    /// Mean of the per-operation CPU usage samples.
    pub mean_cpu_usage: f64,
    pub peak_cpu_usage: f64,
    pub samples: usize,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub categories: BTreeMap<OpCategory, CategoryTotals>,
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MIB
}

impl RunSummary {
    /// Report lines as (metric, value) pairs.
    pub fn metric_rows(&self) -> Vec<(String, String)> {
        let mut rows = vec![
            ("Party".to_owned(), self.party.to_string()),
            ("Number of CPU cores".to_owned(), self.cores.to_string()),
            (
                "Elapsed wall time (s)".to_owned(),
                format!("{:.6}", self.elapsed_wall_time),
            ),
            (
                "Elapsed CPU time (s)".to_owned(),
                format!("{:.6}", self.elapsed_cpu_time),
            ),
            ("CPU usage (%)".to_owned(), format!("{:.4}", self.cpu_usage)),
            (
                "Average CPU usage (%)".to_owned(),
                format!("{:.4}", self.mean_cpu_usage),
            ),
            (
                "Peak CPU usage (%)".to_owned(),
                format!("{:.4}", self.peak_cpu_usage),
            ),
            (
                "Total data sent (MiB)".to_owned(),
                format!("{:.6}", mib(self.bytes_sent)),
            ),
            (
                "Total data received (MiB)".to_owned(),
                format!("{:.6}", mib(self.bytes_received)),
            ),
        ];
        for (category, totals) in &self.categories {
            rows.push((
                format!("Total time in {} (s)", category),
                format!("{:.6}", totals.time),
            ));
            rows.push((
                format!("{} data sent (MiB)", category),
                format!("{:.6}", mib(totals.bytes_sent)),
            ));
            rows.push((
                format!("{} data received (MiB)", category),
                format!("{:.6}", mib(totals.bytes_received)),
            ));
        }
        rows
    }

    pub fn log(&self) {
        for (metric, value) in self.metric_rows() {
            info!("{} = {}", metric, value);
        }
    }

    /// Writes the report as a two-column `Metric,Value` CSV table.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&["Metric", "Value"])?;
        for (metric, value) in self.metric_rows() {
            csv_writer.write_record(&[metric.as_str(), value.as_str()])?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;

    /// Clock advancing by a fixed number of ticks on every read.
    #[derive(Debug)]
    pub(crate) struct SteppingClock {
        ticks: Cell<u64>,
        step: u64,
    }

    impl SteppingClock {
        pub(crate) fn new(step: u64) -> Self {
            SteppingClock {
                ticks: Cell::new(0),
                step,
            }
        }
    }

    impl CpuClock for SteppingClock {
        fn process_ticks(&self) -> Result<u64> {
            let now = self.ticks.get();
            self.ticks.set(now + self.step);
            Ok(now)
        }

        fn ticks_per_second(&self) -> u64 {
            100
        }
    }

    fn counters(bytes_sent: u64, bytes_received: u64) -> CommCounters {
        CommCounters {
            bytes_sent,
            bytes_received,
        }
    }

    #[test]
    fn test_parse_proc_stat() {
        || -> Result<()> {
            let line = "4242 (party (a) b) R 1 4242 4242 0 -1 4194304 2331 0 0 0 250 31 0 0 20 0 1 0 \
                        9147 13885440 1033 18446744073709551615";
            assert_eq!(parse_proc_stat(line)?, 281);
            assert!(parse_proc_stat("4242 party R 1").is_err());
            assert!(parse_proc_stat("4242 (party) R 1 2 3").is_err());
            assert!(parse_proc_stat("1 (p) R 1 1 1 0 -1 0 0 0 0 0 x 3").is_err());
            Ok(())
        }()
        .unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_stat_clock() {
        let clock = ProcStatClock::new();
        assert!(clock.ticks_per_second() > 0);
        let first = clock.process_ticks().unwrap();
        assert!(clock.process_ticks().unwrap() >= first);
    }

    #[test]
    fn test_cpu_utilization() {
        assert_eq!(cpu_utilization(0.5, 1.0, 4), 12.5);
        assert_eq!(cpu_utilization(3.0, 1.0, 2), 150.0);
        assert_eq!(cpu_utilization(1.0, 0.0, 4), 0.0);
    }

    #[test]
    fn test_category_totals_accumulate() {
        || -> Result<()> {
            let mut recorder = MetricsRecorder::new(Box::new(SteppingClock::new(3)), 2);
            let plan = [
                (OpCategory::MatMul, 0, 0, 100, 60),
                (OpCategory::Relu, 100, 60, 164, 124),
                (OpCategory::MatMul, 164, 124, 500, 124),
                (OpCategory::MatMul, 500, 124, 500, 200),
            ];
            let mut metrics = vec![];
            for (category, s0, r0, s1, r1) in plan {
                let segment = recorder.begin(counters(s0, r0))?;
                metrics.push(recorder.finish(segment, "op", Some(category), counters(s1, r1))?);
            }
            let matmul = recorder.totals(OpCategory::MatMul);
            let matmul_metrics: Vec<&OperationMetric> = metrics
                .iter()
                .filter(|m| m.category == Some(OpCategory::MatMul))
                .collect();
            assert_eq!(
                matmul.time,
                matmul_metrics.iter().map(|m| m.wall_time).sum::<f64>()
            );
            assert_eq!(matmul.bytes_sent, 100 + 336);
            assert_eq!(matmul.bytes_received, 60 + 76);
            assert_eq!(matmul.calls, 3);
            assert_eq!(
                recorder.totals(OpCategory::Relu),
                CategoryTotals {
                    time: metrics[1].wall_time,
                    bytes_sent: 64,
                    bytes_received: 64,
                    calls: 1
                }
            );
            assert_eq!(recorder.totals(OpCategory::Conv), CategoryTotals::default());
            // Every segment consumed exactly 3 ticks.
            assert!(metrics.iter().all(|m| m.cpu_time == 0.03));
            Ok(())
        }()
        .unwrap();
    }

    #[test]
    fn test_samples_peak_and_mean() {
        || -> Result<()> {
            let mut recorder = MetricsRecorder::new(Box::new(SteppingClock::new(1)), 1);
            assert_eq!(recorder.mean_cpu_usage(), 0.0);
            for _ in 0..5 {
                let segment = recorder.begin(CommCounters::default())?;
                recorder.finish(segment, "scale up", None, CommCounters::default())?;
            }
            let samples = recorder.cpu_usage_samples().to_vec();
            assert_eq!(samples.len(), 5);
            let peak = samples.iter().cloned().fold(0.0, f64::max);
            assert_eq!(recorder.peak_cpu_usage(), peak);
            let mean = samples.iter().sum::<f64>() / 5.0;
            assert_eq!(recorder.mean_cpu_usage(), mean);
            // Uncategorized segments leave every category untouched.
            for category in OpCategory::ALL {
                assert_eq!(recorder.totals(category).calls, 0);
            }
            Ok(())
        }()
        .unwrap();
    }

    #[test]
    fn test_summary_report() {
        || -> Result<()> {
            let mut recorder = MetricsRecorder::new(Box::new(SteppingClock::new(2)), 4);
            recorder.mark_run_start()?;
            let segment = recorder.begin(counters(0, 0))?;
            recorder.finish(
                segment,
                "avgpool",
                Some(OpCategory::AvgPool),
                counters(1 << 20, 1 << 19),
            )?;
            let summary = recorder.summarize(PartyRole::B, counters(1 << 20, 1 << 19))?;
            assert_eq!(summary.samples, 1);
            assert_eq!(summary.categories.len(), OpCategory::ALL.len());
            assert_eq!(summary.categories[&OpCategory::AvgPool].calls, 1);
            assert!(summary.elapsed_cpu_time > 0.0);

            let rows: BTreeMap<String, String> = summary.metric_rows().into_iter().collect();
            let expected = btreemap! {
                "Party" => "B",
                "Number of CPU cores" => "4",
                "Total data sent (MiB)" => "1.000000",
                "Total data received (MiB)" => "0.500000",
                "AvgPool data sent (MiB)" => "1.000000",
                "MaxPool data sent (MiB)" => "0.000000",
            };
            for (metric, value) in expected {
                assert_eq!(rows[metric], value, "{}", metric);
            }

            let mut csv_bytes = vec![];
            summary.write_csv(&mut csv_bytes)?;
            let mut reader = csv::Reader::from_reader(csv_bytes.as_slice());
            let headers: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();
            assert_eq!(headers, vec!["Metric", "Value"]);
            let records = reader
                .records()
                .collect::<std::result::Result<Vec<csv::StringRecord>, csv::Error>>()?;
            assert_eq!(records.len(), summary.metric_rows().len());
            assert!(records
                .iter()
                .any(|r| &r[0] == "AvgPool data sent (MiB)" && &r[1] == "1.000000"));
            assert!(records.iter().any(|r| &r[0] == "Total time in AvgPool (s)"));

            let json = serde_json::to_string(&summary)?;
            let restored: RunSummary = serde_json::from_str(&json)?;
            assert_eq!(restored.categories, summary.categories);
            Ok(())
        }()
        .unwrap();
    }
}
