//! Start and end of one party's computation.
//!
//! The parties must pass a barrier before the first layer runs and the protocol
//! engine must be finalized after the last one. [`ComputationLifecycle`] hands
//! out the [`OperationDispatcher`] only after the barrier, and
//! [`OperationDispatcher::end_computation`] consumes it.
use crate::config::RunConfig;
use crate::dispatcher::OperationDispatcher;
use crate::errors::Result;
use crate::metrics::{CpuClock, MetricsRecorder, ProcStatClock, RunSummary};
use crate::party::policy_for;
use crate::protocol::ProtocolEngine;

use chrono::Utc;
use log::info;

#[derive(Debug)]
pub struct ComputationLifecycle<E: ProtocolEngine> {
    engine: E,
    config: RunConfig,
    clock: Box<dyn CpuClock>,
}

impl<E: ProtocolEngine> ComputationLifecycle<E> {
    pub fn new(engine: E, config: RunConfig) -> Self {
        Self::with_clock(engine, config, Box::new(ProcStatClock::new()))
    }

    pub fn with_clock(engine: E, config: RunConfig, clock: Box<dyn CpuClock>) -> Self {
        ComputationLifecycle {
            engine,
            config,
            clock,
        }
    }

    /// Records the baselines, waits for the other parties and starts the engine.
    pub fn start_computation(self) -> Result<OperationDispatcher<E>> {
        let ComputationLifecycle {
            mut engine,
            config,
            clock,
        } = self;
        let cores = config.cores();
        let mut recorder = MetricsRecorder::new(clock, cores);
        recorder.mark_run_start()?;
        info!("Computation started. CPU and wall clocks initialized.");
        info!("Number of CPU cores: {}", cores);

        info!(
            "Party {} reached start of computation. Synchronizing across parties...",
            config.party
        );
        engine.synchronize(config.sync_buffer_size)?;
        info!(
            "Synchronized - now starting actual execution at {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC")
        );
        engine.start()?;

        let policy = policy_for(config.party);
        Ok(OperationDispatcher::new(engine, policy, config, recorder))
    }
}

impl<E: ProtocolEngine> OperationDispatcher<E> {
    /// Finalizes the engine and reports the run. Must be the last call of a run.
    pub fn end_computation(mut self) -> Result<(RunSummary, E)> {
        self.engine.finish()?;
        let summary = self
            .recorder
            .summarize(self.config.party, self.engine.comm_counters())?;
        info!(
            "Average CPU usage across all segments: {:.4} %",
            summary.mean_cpu_usage
        );
        info!(
            "Peak CPU usage during computation: {:.4} %",
            summary.peak_cpu_usage
        );
        summary.log();
        Ok((summary, self.engine))
    }
}
