use crate::core::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

/// Runs extract, transform and load in order, stopping at the first error.
pub struct ConversionEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> ConversionEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub async fn run(&self) -> Result<String> {
        tracing::info!("Starting conversion...");
        self.monitor.log_stats("Start");

        tracing::info!("Reading CmdStan output...");
        let run = self.pipeline.extract().await?;
        tracing::info!(
            "Read {} chain(s), {} prior chain(s), observed data: {}",
            run.output.len(),
            run.prior.len(),
            if run.observed_data.is_some() { "yes" } else { "no" }
        );
        self.monitor.log_stats("Extract");

        tracing::info!("Building inference data...");
        let data = self.pipeline.transform(run).await?;
        let groups: Vec<&str> = data.groups().iter().map(|(name, _)| *name).collect();
        tracing::info!("Built groups: {}", groups.join(", "));
        self.monitor.log_stats("Transform");

        tracing::info!("Writing results...");
        let output_path = self.pipeline.load(data).await?;
        tracing::info!("Output saved to: {}", output_path);
        self.monitor.log_stats("Load");
        self.monitor.log_final_stats();

        Ok(output_path)
    }
}
