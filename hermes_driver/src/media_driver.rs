//! Launcher: wires the cnc file, the conductor and its runner together.

use std::sync::Arc;

use hermes_core::agent::{AgentRunner, IdleStrategy};
use hermes_core::error::HermesResult;
use hermes_core::memory::cnc_file::{cnc_path, CncFile};

use crate::conductor::DriverConductor;
use crate::context::DriverContext;

/// A running media driver.
///
/// Field order matters for drop: the runner joins its thread before the
/// cnc mapping (which conductor buffer views point into) is released.
pub struct MediaDriver {
    runner: AgentRunner,
    cnc: Arc<CncFile>,
    context: DriverContext,
}

impl MediaDriver {
    /// Create the hermes directory, the cnc file and the conductor, and
    /// start the duty cycle on its own thread.
    pub fn launch(context: DriverContext) -> HermesResult<Self> {
        Self::launch_with_idle_strategy(context, IdleStrategy::default())
    }

    pub fn launch_with_idle_strategy(
        context: DriverContext,
        idle_strategy: IdleStrategy,
    ) -> HermesResult<Self> {
        std::fs::create_dir_all(context.hermes_dir.join("publications"))?;

        let cnc = Arc::new(CncFile::create(
            &cnc_path(&context.hermes_dir),
            context.config.cnc_layout(),
            context.config.client_liveness_timeout_ns,
            (context.epoch_clock)(),
        )?);

        log::info!(
            "media driver starting in {} (term length {})",
            context.hermes_dir.display(),
            context.config.term_length
        );

        let conductor = DriverConductor::new(context.clone(), Arc::clone(&cnc))?;
        let runner = AgentRunner::start(conductor, idle_strategy)?;

        Ok(Self {
            runner,
            cnc,
            context,
        })
    }

    /// The shared cnc file, for in-process clients.
    pub fn cnc(&self) -> &Arc<CncFile> {
        &self.cnc
    }

    pub fn context(&self) -> &DriverContext {
        &self.context
    }

    /// Stop the conductor and wait for its thread.
    pub fn shutdown(&mut self) {
        self.runner.stop();
    }
}

impl Drop for MediaDriver {
    fn drop(&mut self) {
        self.shutdown();
        let _ = std::fs::remove_dir_all(self.context.hermes_dir.join("publications"));
    }
}
