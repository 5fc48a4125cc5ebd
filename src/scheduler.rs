//! Periodic module dispatch
//!
//! A single loop ticks at a fixed granularity and invokes every module whose
//! next-due instant has elapsed. Each invocation runs as its own task so a
//! slow module never holds up the others; the instance mutex keeps
//! invocations of one module from overlapping.

use chrono::Utc;
use log::{debug, info, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, Mutex, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use crate::buffer::PointBuffer;
use crate::config::ModuleDescriptor;
use crate::module::MetricModule;

/// Fixed polling granularity of the dispatch loop
const TICK: Duration = Duration::from_secs(1);

/// Per-module stagger step; offsets wrap below the tick so they stay small
const STAGGER_STEP_MS: u64 = 200;

/// How long shutdown waits for in-flight invocations
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct ScheduledModule {
    name: String,
    instance: Arc<Mutex<Box<dyn MetricModule>>>,
    interval: Duration,
    budget: Duration,
    next_due: Instant,
}

pub struct Scheduler {
    modules: Vec<ScheduledModule>,
    buffer: Arc<PointBuffer>,
    /// Tags stamped on every point that does not already carry them
    global_tags: Vec<(String, String)>,
}

impl Scheduler {
    /// Build the schedule from instantiated modules. Stagger offsets derive
    /// from registration order so modules with equal intervals do not all
    /// fire in the same instant.
    pub fn new(
        modules: Vec<(ModuleDescriptor, Box<dyn MetricModule>)>,
        buffer: Arc<PointBuffer>,
        global_tags: Vec<(String, String)>,
    ) -> Self {
        let start = Instant::now();
        let modules = modules
            .into_iter()
            .enumerate()
            .map(|(index, (descriptor, instance))| {
                let stagger =
                    Duration::from_millis(STAGGER_STEP_MS * index as u64 % TICK.as_millis() as u64);
                ScheduledModule {
                    name: descriptor.name.clone(),
                    instance: Arc::new(Mutex::new(instance)),
                    interval: descriptor.interval(),
                    budget: descriptor.timeout(),
                    next_due: start + descriptor.interval() + stagger,
                }
            })
            .collect();

        Self {
            modules,
            buffer,
            global_tags,
        }
    }

    /// Run the dispatch loop until `shutdown` flips to true, then wait a
    /// bounded grace period for in-flight invocations.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();

        info!("Scheduler running {} modules", self.modules.len());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatch_due(&mut in_flight);
                    // Reap finished invocations without blocking the loop
                    while in_flight.try_join_next().is_some() {}
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as a stop request
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            debug!("Waiting up to {:?} for in-flight collections", SHUTDOWN_GRACE);
            let drain = async {
                while in_flight.join_next().await.is_some() {}
            };
            if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
                warn!("Abandoning collections still running at shutdown");
            }
        }
        info!("Scheduler stopped");
    }

    fn dispatch_due(&mut self, in_flight: &mut JoinSet<()>) {
        let now = Instant::now();

        for module in &mut self.modules {
            if module.next_due > now {
                continue;
            }

            // Advance by the interval, not by elapsed time, so cadence does
            // not drift; resynchronise when more than a full interval was
            // missed rather than bursting to catch up.
            module.next_due += module.interval;
            if module.next_due <= now {
                warn!(
                    "Module '{}' missed at least one full interval; resynchronising",
                    module.name
                );
                module.next_due = now + module.interval;
            }

            let Ok(guard) = Arc::clone(&module.instance).try_lock_owned() else {
                warn!(
                    "Module '{}' is still running from a previous cycle; skipping",
                    module.name
                );
                continue;
            };

            let name = module.name.clone();
            let budget = module.budget;
            let buffer = Arc::clone(&self.buffer);
            let tags = self.global_tags.clone();
            in_flight.spawn(run_invocation(guard, name, budget, tags, buffer));
        }
    }
}

/// Invoke one module and push its output to the buffer as a unit
async fn run_invocation(
    mut instance: OwnedMutexGuard<Box<dyn MetricModule>>,
    name: String,
    budget: Duration,
    global_tags: Vec<(String, String)>,
    buffer: Arc<PointBuffer>,
) {
    // Points are stamped at invocation start
    let started = Utc::now();

    match tokio::time::timeout(budget, instance.collect(started)).await {
        Ok(Ok(points)) => {
            let mut valid: Vec<_> = points
                .into_iter()
                .filter(|point| {
                    if point.is_valid() {
                        true
                    } else {
                        debug!("Module '{}' produced a point with no fields; dropped", name);
                        false
                    }
                })
                .collect();

            for point in &mut valid {
                for (key, value) in &global_tags {
                    point
                        .tags
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
            }

            if !valid.is_empty() {
                trace!("Module '{}' produced {} points", name, valid.len());
                buffer.push(valid);
            }
        }
        Ok(Err(e)) => {
            // Skip this cycle only; the module stays scheduled
            warn!("Collection failed for module '{}': {}", name, e);
        }
        Err(_) => {
            warn!(
                "Module '{}' exceeded its {:?} budget; discarding this cycle",
                name, budget
            );
        }
    }
}
