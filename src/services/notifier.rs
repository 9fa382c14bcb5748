//! Datapoint-change notification dispatch.
//!
//! The notifier is an explicit service holding the
//! `(block, datapoint) -> handlers` index. Blocks declare their handlers
//! at build time; [`Notifier::register_block`] resolves the declarations
//! when the block is woven, mirroring the original's two-phase
//! decorator registration.
//!
//! Handler panics are trapped and logged; they never unwind into the
//! dispatching stack thread. A handler marked `threaded` runs on a fresh
//! worker per invocation.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use log::{debug, error};

use crate::binding::functional_block::{
    Condition, DatapointEvent, FunctionalBlock, HandlerSpec,
};
use crate::dpt::Value;

struct Job {
    fb: Arc<FunctionalBlock>,
    spec: HandlerSpec,
}

/// The notification dispatcher.
#[derive(Default)]
pub struct Notifier {
    /// `(block name, datapoint name) -> jobs`.
    jobs: RwLock<HashMap<(String, String), Vec<Job>>>,
}

impl Notifier {
    /// Create an empty dispatcher.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Resolve a block's handler declarations into the dispatch index.
    ///
    /// Re-registration replaces the block's previous entries, which makes
    /// repeated weaves idempotent.
    pub fn register_block(&self, fb: &Arc<FunctionalBlock>) {
        let mut jobs = self.jobs.write().expect("notifier index poisoned");
        jobs.retain(|(block, _), _| block != fb.name());
        for spec in fb.handlers() {
            let key = (fb.name().to_owned(), spec.datapoint.clone());
            jobs.entry(key).or_default().push(Job {
                fb: Arc::clone(fb),
                spec: spec.clone(),
            });
        }
    }

    /// Drop a block's entries.
    pub fn unregister_block(&self, block: &str) {
        self.jobs
            .write()
            .expect("notifier index poisoned")
            .retain(|(name, _), _| name != block);
    }

    /// Number of registered handler entries, across all blocks.
    pub fn len(&self) -> usize {
        self.jobs
            .read()
            .expect("notifier index poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch a datapoint write to every matching handler.
    ///
    /// `change` handlers fire only when `old != new`; `always` handlers
    /// fire on every write.
    pub fn datapoint_notify(&self, block: &str, datapoint: &str, old: Value, new: Value) {
        let matching: Vec<(Arc<FunctionalBlock>, HandlerSpec)> = {
            let jobs = self.jobs.read().expect("notifier index poisoned");
            jobs.get(&(block.to_owned(), datapoint.to_owned()))
                .map(|jobs| {
                    jobs.iter()
                        .map(|job| (Arc::clone(&job.fb), job.spec.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        for (fb, spec) in matching {
            let fires = match spec.condition {
                Condition::Change => old != new,
                Condition::Always => true,
            };
            if !fires {
                continue;
            }

            let event = DatapointEvent {
                datapoint: datapoint.to_owned(),
                old_value: old,
                new_value: new,
                condition: spec.condition,
            };

            if spec.threaded {
                let callback = Arc::clone(&spec.callback);
                let spawned = std::thread::Builder::new()
                    .name("knx-notify".into())
                    .spawn(move || execute(&fb, &callback, &event));
                if let Err(e) = spawned {
                    error!("notifier worker spawn failed: {e}");
                }
            } else {
                execute(&fb, &spec.callback, &event);
            }
        }
    }
}

/// Run one handler, trapping panics.
fn execute(
    fb: &Arc<FunctionalBlock>,
    callback: &Arc<crate::binding::functional_block::HandlerFn>,
    event: &DatapointEvent,
) {
    debug!("notify {}.{}", fb.name(), event.datapoint);
    let outcome = catch_unwind(AssertUnwindSafe(|| callback(fb, event)));
    if outcome.is_err() {
        error!(
            "handler for {}.{} panicked; event dropped",
            fb.name(),
            event.datapoint
        );
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").field("handlers", &self.len()).finish()
    }
}
