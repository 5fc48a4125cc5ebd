//! Agent lifecycle: wires modules, buffer, scheduler and writer together
//!
//! Shutdown is ordered: the scheduler stops admitting work and drains its
//! in-flight collections first, and only then does the writer run its final
//! flush, so nothing collected before the stop signal is stranded.

use log::{info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::buffer::PointBuffer;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::registry::ModuleRegistry;
use crate::scheduler::Scheduler;
use crate::sink::MetricSink;
use crate::writer::Writer;

/// Lifecycle states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Starting,
    Running,
    Draining,
    Stopped,
}

pub struct Agent {
    config: AgentConfig,
    registry: ModuleRegistry,
}

impl Agent {
    /// An agent with the built-in module types
    pub fn new(config: AgentConfig) -> Self {
        Self::with_registry(config, ModuleRegistry::with_builtins())
    }

    /// An agent with a caller-supplied registry, for embedding custom modules
    pub fn with_registry(config: AgentConfig, registry: ModuleRegistry) -> Self {
        Self { config, registry }
    }

    /// Access the registry before start, e.g. to add custom module types
    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    /// Instantiate modules and spawn the scheduler and writer.
    ///
    /// Fails when no module at all could be enabled; an agent with nothing to
    /// collect is a misconfiguration, not a degraded mode. An unreachable sink
    /// is only a warning: the buffer absorbs points until it recovers.
    pub async fn start<S: MetricSink>(self, sink: Arc<S>) -> Result<AgentHandle> {
        let (state_tx, state_rx) = watch::channel(AgentState::Starting);

        // Descriptor problems disable the offending module inside build_all;
        // only an empty result is fatal.

        let modules = self.registry.build_all(&self.config.modules);
        if modules.is_empty() {
            return Err(AgentError::Config(
                "No modules could be enabled; nothing to collect".to_string(),
            ));
        }

        if let Err(e) = sink.ping().await {
            warn!(
                "Sink '{}' is not reachable yet; buffering until it recovers: {}",
                sink.name(),
                e
            );
        }

        let buffer = Arc::new(PointBuffer::new(self.config.buffer.capacity));
        let global_tags = vec![("host".to_string(), host_tag())];

        let scheduler = Scheduler::new(modules, Arc::clone(&buffer), global_tags);
        let writer = Writer::new(sink, Arc::clone(&buffer), self.config.writer.clone());

        let (scheduler_stop_tx, scheduler_stop_rx) = watch::channel(false);
        let (writer_stop_tx, writer_stop_rx) = watch::channel(false);

        let scheduler_task = tokio::spawn(scheduler.run(scheduler_stop_rx));
        let writer_task = tokio::spawn(writer.run(writer_stop_rx));

        state_tx.send_replace(AgentState::Running);
        info!("Agent running");

        Ok(AgentHandle {
            state_tx,
            state_rx,
            buffer,
            scheduler_stop_tx,
            writer_stop_tx,
            scheduler_task,
            writer_task,
        })
    }
}

/// Hostname for the global `host` tag
fn host_tag() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("Could not determine hostname: {}", e);
            "unknown".to_string()
        }
    }
}

/// Handle to a running agent
pub struct AgentHandle {
    state_tx: watch::Sender<AgentState>,
    state_rx: watch::Receiver<AgentState>,
    buffer: Arc<PointBuffer>,
    scheduler_stop_tx: watch::Sender<bool>,
    writer_stop_tx: watch::Sender<bool>,
    scheduler_task: JoinHandle<()>,
    writer_task: JoinHandle<bool>,
}

impl AgentHandle {
    pub fn state(&self) -> AgentState {
        *self.state_rx.borrow()
    }

    /// The buffer between scheduler and writer, exposed for inspection
    pub fn buffer(&self) -> &Arc<PointBuffer> {
        &self.buffer
    }

    /// Stop collection, flush what remains, and wait for both loops to end.
    ///
    /// Returns an error when the final flush could not deliver every buffered
    /// point, so callers can exit non-zero.
    pub async fn shutdown(self) -> Result<()> {
        self.state_tx.send_replace(AgentState::Draining);
        info!("Agent draining");

        // Collection stops completely before the writer's last pass
        self.scheduler_stop_tx.send(true).ok();
        if let Err(e) = self.scheduler_task.await {
            warn!("Scheduler task ended abnormally: {}", e);
        }

        self.writer_stop_tx.send(true).ok();
        let flushed = match self.writer_task.await {
            Ok(flushed) => flushed,
            Err(e) => {
                warn!("Writer task ended abnormally: {}", e);
                false
            }
        };

        self.state_tx.send_replace(AgentState::Stopped);
        info!("Agent stopped");

        if flushed {
            Ok(())
        } else {
            Err(AgentError::Other(
                "Shutdown flush could not deliver all buffered points".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::config::{BufferConfig, InfluxConfig, LogLevel, ModuleDescriptor, WriterConfig};
    use crate::sink::{InjectedFailure, MemorySink};

    fn config(modules: Vec<ModuleDescriptor>) -> AgentConfig {
        AgentConfig {
            influx: InfluxConfig {
                host: "localhost".to_string(),
                port: 8086,
                database: "metrics".to_string(),
                username: None,
                password: None,
                https: false,
                timeout_secs: 10,
            },
            writer: WriterConfig::default(),
            buffer: BufferConfig::default(),
            modules,
            log_level: LogLevel::default(),
        }
    }

    fn descriptor(name: &str, interval: u64) -> ModuleDescriptor {
        ModuleDescriptor {
            name: name.to_string(),
            module: Some("memory".to_string()),
            interval_secs: interval,
            enabled: true,
            timeout_secs: None,
            options: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_start_fails_with_no_enabled_modules() {
        let mut off = descriptor("memory", 10);
        off.enabled = false;

        let Err(err) = Agent::new(config(vec![off]))
            .start(Arc::new(MemorySink::new()))
            .await
        else {
            panic!("start must fail when no module is enabled");
        };
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_descriptor_disables_only_itself() {
        let mut bad = descriptor("bad", 10);
        bad.interval_secs = 0;

        let sink = Arc::new(MemorySink::new());
        let handle = Agent::new(config(vec![descriptor("memory", 1), bad]))
            .start(Arc::clone(&sink))
            .await
            .unwrap();
        assert_eq!(handle.state(), AgentState::Running);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        handle.shutdown().await.unwrap();

        // The valid module keeps collecting; only the offender is disabled
        assert!(sink.points().iter().any(|p| p.name == "memory"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_runs_and_flushes_on_shutdown() {
        let sink = Arc::new(MemorySink::new());
        let handle = Agent::new(config(vec![descriptor("memory", 1)]))
            .start(Arc::clone(&sink))
            .await
            .unwrap();
        assert_eq!(handle.state(), AgentState::Running);

        // Late points that the writer cadence has not picked up yet
        handle.buffer().push(vec![
            crate::point::MetricPoint::new("cpu", chrono::Utc::now()).with_field("value", 1.0),
        ]);

        handle.shutdown().await.unwrap();
        assert!(sink.points().iter().any(|p| p.name == "cpu"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_surfaces_as_error() {
        let sink = Arc::new(MemorySink::new());
        let mut agent_config = config(vec![descriptor("memory", 60)]);
        // Keep the cadence drain out of the way so the point is still
        // buffered when the final flush runs
        agent_config.writer.interval_secs = 3_600;
        let handle = Agent::new(agent_config)
            .start(Arc::clone(&sink))
            .await
            .unwrap();

        handle.buffer().push(vec![
            crate::point::MetricPoint::new("cpu", chrono::Utc::now()).with_field("value", 1.0),
        ]);
        sink.fail_next(InjectedFailure::Transient, 1);

        let err = handle.shutdown().await.unwrap_err();
        assert!(err.to_string().contains("flush"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_collected_points_carry_host_tag() {
        let sink = Arc::new(MemorySink::new());
        let handle = Agent::new(config(vec![descriptor("memory", 1)]))
            .start(Arc::clone(&sink))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        handle.shutdown().await.unwrap();

        let points = sink.points();
        assert!(!points.is_empty());
        assert!(points.iter().all(|p| p.tags.contains_key("host")));
    }
}
