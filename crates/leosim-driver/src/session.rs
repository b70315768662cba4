//! The scenario loop: one simulation run for the base event stream, plus
//! one per injected failure file, each over fresh per-run state.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;

use leosim_core::metrics::{MetricsCollector, TOTALS_CSV_HEADER};
use leosim_core::units::{BitsPerSec, Nanosecs};
use leosim_core::Config;
use leosim_frontend as frontend;

#[derive(Debug, clap::Parser)]
#[command(name = "leosim", about = "Run a LEO constellation workload")]
pub(crate) struct Session {
    /// Constellation graph JSON.
    #[clap(long)]
    graph: PathBuf,
    /// Switching tables JSON.
    #[clap(long)]
    tables: PathBuf,
    /// Traffic workload JSON.
    #[clap(long)]
    traffic: PathBuf,
    /// Scheduled LINK_UP / LINK_DOWN events JSON.
    #[clap(long)]
    events: Option<PathBuf>,
    /// Dynamic per-window link weights JSON.
    #[clap(long)]
    weights: Option<PathBuf>,
    /// A failure scenario JSON; repeat for one run per scenario.
    #[clap(long = "failure", value_name = "FILE")]
    failures: Vec<PathBuf>,
    /// Directory for CSV output.
    #[clap(long, default_value = "./out")]
    output: PathBuf,
    /// Simulation horizon in seconds.
    #[clap(long, default_value_t = 60.0)]
    stop_time: f64,
    /// Consider only primary next hops.
    #[clap(long)]
    no_backup_path: bool,
    /// Refuse to forward a packet back out its ingress link.
    #[clap(long)]
    simple_loop_avoidance: bool,
    #[clap(long, default_value_t = 1000)]
    isl_data_rate_mbps: u64,
    #[clap(long, default_value_t = 500)]
    feeder_data_rate_mbps: u64,
    /// Skip the per-flow CSV files.
    #[clap(long)]
    no_csv: bool,
}

impl Session {
    pub(crate) fn run(self) -> anyhow::Result<()> {
        let graph = frontend::read_graph(&self.graph)
            .with_context(|| format!("failed to read graph {}", self.graph.display()))?;
        let tables = frontend::read_switching_tables(&self.tables)
            .with_context(|| format!("failed to read tables {}", self.tables.display()))?;
        let traffic = frontend::read_traffic(&self.traffic)
            .with_context(|| format!("failed to read traffic {}", self.traffic.display()))?;
        let events = match &self.events {
            Some(path) => frontend::read_events(path)
                .with_context(|| format!("failed to read events {}", path.display()))?,
            None => Vec::new(),
        };
        let weights = match &self.weights {
            Some(path) => frontend::read_weight_windows(path)
                .with_context(|| format!("failed to read weights {}", path.display()))?,
            None => Vec::new(),
        };

        // The base run carries no injected failures; each failure file is
        // its own run over fresh state.
        let mut scenarios = vec![("none".to_owned(), Vec::new())];
        for path in &self.failures {
            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("failure")
                .to_owned();
            let failure = frontend::read_events(path)
                .with_context(|| format!("failed to read failures {}", path.display()))?;
            scenarios.push((name, failure));
        }

        std::fs::create_dir_all(&self.output)
            .with_context(|| format!("failed to create {}", self.output.display()))?;
        for (run, (name, failure)) in scenarios.into_iter().enumerate() {
            let run = run as u32 + 1;
            tracing::info!(run, scenario = %name, "starting scenario");
            let spec = frontend::build_spec(
                graph.clone(),
                tables.clone(),
                events.clone(),
                failure,
                weights.clone(),
                traffic.clone(),
                self.config(),
            )?;
            let metrics = leosim_core::run(spec)?;
            self.report(run, &name, &metrics)?;
        }
        Ok(())
    }

    fn config(&self) -> Config {
        Config::builder()
            .stop_time(Nanosecs::from_secs_f64(self.stop_time))
            .use_backup_path(!self.no_backup_path)
            .simple_loop_avoidance(self.simple_loop_avoidance)
            .isl_data_rate(BitsPerSec::from_mbps(self.isl_data_rate_mbps))
            .feeder_data_rate(BitsPerSec::from_mbps(self.feeder_data_rate_mbps))
            .write_csv(!self.no_csv)
            .build()
    }

    fn report(&self, run: u32, scenario: &str, metrics: &MetricsCollector) -> anyhow::Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "=== Run {run} (scenario: {scenario}) ===")?;
        metrics.write_summary(&mut stdout)?;

        if !self.no_csv {
            let path = self.output.join(format!("flows_{scenario}.csv"));
            let mut file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            metrics.write_flow_csv(&mut file)?;
        }

        let totals_path = self.output.join("totals.csv");
        let mut totals = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&totals_path)
            .with_context(|| format!("failed to open {}", totals_path.display()))?;
        if totals.metadata()?.len() == 0 {
            writeln!(totals, "{TOTALS_CSV_HEADER}")?;
        }
        metrics.write_totals_row(&mut totals, run, scenario)?;
        Ok(())
    }
}
