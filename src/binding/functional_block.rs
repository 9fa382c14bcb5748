//! Functional blocks: user-defined units of application logic.
//!
//! A block is declared through [`FunctionalBlockBuilder`]: datapoints,
//! group objects and datapoint handlers are all collected before the
//! instance exists, and the weave later resolves them - the same
//! declaration-before-instantiation contract the decorator registration
//! of the original framework provides, expressed as a builder.
//!
//! All of a block's current values live under one lock, so a handler
//! always sees a consistent old/new pair even under concurrent writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use log::trace;

use crate::binding::datapoint::{AccessMode, Datapoint, DatapointSpec};
use crate::binding::ets::Ets;
use crate::binding::group_object::{Flags, GroupObjectSpec};
use crate::dpt::{DptId, Value};
use crate::error::{KnxError, Result};
use crate::protocol::Priority;

/// When a datapoint handler fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Only when the value actually changed.
    Change,
    /// On every write, changed or not.
    Always,
}

/// The event record a datapoint handler receives.
#[derive(Debug, Clone)]
pub struct DatapointEvent {
    /// Name of the datapoint that was written.
    pub datapoint: String,
    /// Value before the write.
    pub old_value: Value,
    /// Value after the write.
    pub new_value: Value,
    /// The condition the handler was registered with.
    pub condition: Condition,
}

/// A datapoint handler callback.
pub type HandlerFn = dyn Fn(&FunctionalBlock, &DatapointEvent) + Send + Sync;

/// A registered handler declaration.
#[derive(Clone)]
pub struct HandlerSpec {
    /// Watched datapoint.
    pub datapoint: String,
    /// Firing condition.
    pub condition: Condition,
    /// Run on a fresh worker thread instead of inline.
    pub threaded: bool,
    /// The callback.
    pub callback: Arc<HandlerFn>,
}

impl std::fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSpec")
            .field("datapoint", &self.datapoint)
            .field("condition", &self.condition)
            .field("threaded", &self.threaded)
            .finish_non_exhaustive()
    }
}

/// A functional block instance.
pub struct FunctionalBlock {
    name: String,
    description: String,
    datapoints: Vec<Datapoint>,
    group_objects: Vec<GroupObjectSpec>,
    handlers: Vec<HandlerSpec>,
    values: Mutex<HashMap<String, Value>>,
    ets: RwLock<Option<Weak<Ets>>>,
}

impl FunctionalBlock {
    /// Start a declaration.
    pub fn builder(name: impl Into<String>) -> FunctionalBlockBuilder {
        FunctionalBlockBuilder::new(name)
    }

    /// Block name, unique within the registry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-text description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared datapoints.
    pub fn datapoints(&self) -> &[Datapoint] {
        &self.datapoints
    }

    /// Find a datapoint by name.
    pub fn datapoint(&self, name: &str) -> Option<&Datapoint> {
        self.datapoints.iter().find(|dp| dp.name() == name)
    }

    /// Declared group objects.
    pub fn group_objects(&self) -> &[GroupObjectSpec] {
        &self.group_objects
    }

    /// Declared handlers.
    pub fn handlers(&self) -> &[HandlerSpec] {
        &self.handlers
    }

    /// Current value of a datapoint; the default before the first write.
    ///
    /// # Errors
    ///
    /// `ConfigErrorKind::DanglingReference` for an unknown datapoint.
    pub fn value(&self, datapoint: &str) -> Result<Value> {
        let dp = self
            .datapoint(datapoint)
            .ok_or_else(|| KnxError::dangling_reference(format!("{}.{datapoint}", self.name)))?;
        let values = self.values.lock().expect("value lock poisoned");
        Ok(values.get(datapoint).copied().unwrap_or(dp.default_value()))
    }

    /// Local write: validate, store, then let the binding layer transmit
    /// and notify.
    ///
    /// Before the block is woven the value is stored silently.
    ///
    /// # Errors
    ///
    /// `ConfigErrorKind::DanglingReference` for an unknown datapoint,
    /// `DptErrorKind` if the value fails the DPT's validation.
    pub fn set_value(&self, datapoint: &str, value: Value) -> Result<()> {
        let dp = self
            .datapoint(datapoint)
            .ok_or_else(|| KnxError::dangling_reference(format!("{}.{datapoint}", self.name)))?;
        if !dp.xlator().validate(&value) {
            return Err(KnxError::dpt_value_out_of_range());
        }

        let old = {
            let mut values = self.values.lock().expect("value lock poisoned");
            values
                .insert(datapoint.to_owned(), value)
                .unwrap_or(dp.default_value())
        };

        let ets = self
            .ets
            .read()
            .expect("ets link poisoned")
            .as_ref()
            .and_then(Weak::upgrade);
        match ets {
            Some(ets) => ets.local_datapoint_write(self, datapoint, old, value),
            None => trace!("{}.{datapoint} set before weave, stored only", self.name),
        }
        Ok(())
    }

    /// Bus-driven update: store and return the old/new pair, without
    /// triggering a transmit.
    pub(crate) fn update_from_bus(&self, datapoint: &str, value: Value) -> Option<(Value, Value)> {
        let dp = self.datapoint(datapoint)?;
        let mut values = self.values.lock().expect("value lock poisoned");
        let old = values
            .insert(datapoint.to_owned(), value)
            .unwrap_or(dp.default_value());
        Some((old, value))
    }

    pub(crate) fn attach(&self, ets: Weak<Ets>) {
        *self.ets.write().expect("ets link poisoned") = Some(ets);
    }

    pub(crate) fn detach(&self) {
        *self.ets.write().expect("ets link poisoned") = None;
    }
}

impl std::fmt::Debug for FunctionalBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionalBlock")
            .field("name", &self.name)
            .field("datapoints", &self.datapoints.len())
            .field("group_objects", &self.group_objects.len())
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

struct RawDatapoint {
    name: String,
    dpt: String,
    access: AccessMode,
    default: Value,
}

struct RawGroupObject {
    datapoint: String,
    flags: String,
    priority: Priority,
    links: Vec<String>,
}

/// Collects a block declaration; [`FunctionalBlockBuilder::build`]
/// validates everything at once.
pub struct FunctionalBlockBuilder {
    name: String,
    description: String,
    datapoints: Vec<RawDatapoint>,
    group_objects: Vec<RawGroupObject>,
    handlers: Vec<HandlerSpec>,
}

impl FunctionalBlockBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            datapoints: Vec::new(),
            group_objects: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Free-text description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a datapoint.
    #[must_use]
    pub fn datapoint(
        mut self,
        name: impl Into<String>,
        dpt: impl Into<String>,
        access: AccessMode,
        default: Value,
    ) -> Self {
        self.datapoints.push(RawDatapoint {
            name: name.into(),
            dpt: dpt.into(),
            access,
            default,
        });
        self
    }

    /// Declare a group object linked to the GAD-map entry of the same name.
    #[must_use]
    pub fn group_object(
        self,
        datapoint: impl Into<String>,
        flags: impl Into<String>,
        priority: Priority,
    ) -> Self {
        self.group_object_linked(datapoint, flags, priority, &[])
    }

    /// Declare a group object with explicit GAD-map links.
    #[must_use]
    pub fn group_object_linked(
        mut self,
        datapoint: impl Into<String>,
        flags: impl Into<String>,
        priority: Priority,
        links: &[&str],
    ) -> Self {
        self.group_objects.push(RawGroupObject {
            datapoint: datapoint.into(),
            flags: flags.into(),
            priority,
            links: links.iter().map(|&s| s.to_owned()).collect(),
        });
        self
    }

    /// Register a handler, run inline on the notifying thread.
    #[must_use]
    pub fn on_datapoint<F>(self, datapoint: impl Into<String>, condition: Condition, f: F) -> Self
    where
        F: Fn(&FunctionalBlock, &DatapointEvent) + Send + Sync + 'static,
    {
        self.handler(datapoint, condition, false, f)
    }

    /// Register a handler, run on a fresh worker thread per invocation.
    #[must_use]
    pub fn on_datapoint_threaded<F>(
        self,
        datapoint: impl Into<String>,
        condition: Condition,
        f: F,
    ) -> Self
    where
        F: Fn(&FunctionalBlock, &DatapointEvent) + Send + Sync + 'static,
    {
        self.handler(datapoint, condition, true, f)
    }

    fn handler<F>(
        mut self,
        datapoint: impl Into<String>,
        condition: Condition,
        threaded: bool,
        f: F,
    ) -> Self
    where
        F: Fn(&FunctionalBlock, &DatapointEvent) + Send + Sync + 'static,
    {
        self.handlers.push(HandlerSpec {
            datapoint: datapoint.into(),
            condition,
            threaded,
            callback: Arc::new(f),
        });
        self
    }

    /// Validate the declaration and produce the block.
    ///
    /// # Errors
    ///
    /// Duplicate datapoint names, unknown DPT identifiers, invalid
    /// defaults, bad flag strings, and group objects or handlers that
    /// name a datapoint the block does not declare.
    pub fn build(self) -> Result<Arc<FunctionalBlock>> {
        let mut datapoints: Vec<Datapoint> = Vec::with_capacity(self.datapoints.len());
        for raw in self.datapoints {
            if datapoints.iter().any(|dp| dp.name() == raw.name) {
                return Err(KnxError::duplicate_datapoint(format!(
                    "{}.{}",
                    self.name, raw.name
                )));
            }
            let dpt: DptId = raw.dpt.parse()?;
            datapoints.push(Datapoint::new(DatapointSpec {
                name: raw.name,
                dpt,
                access: raw.access,
                default: raw.default,
            })?);
        }

        let mut group_objects = Vec::with_capacity(self.group_objects.len());
        for raw in self.group_objects {
            if !datapoints.iter().any(|dp| dp.name() == raw.datapoint) {
                return Err(KnxError::dangling_reference(format!(
                    "group object for unknown datapoint {}.{}",
                    self.name, raw.datapoint
                )));
            }
            group_objects.push(GroupObjectSpec {
                datapoint: raw.datapoint,
                flags: Flags::parse(&raw.flags)?,
                priority: raw.priority,
                links: raw.links,
            });
        }

        for handler in &self.handlers {
            if !datapoints.iter().any(|dp| dp.name() == handler.datapoint) {
                return Err(KnxError::dangling_reference(format!(
                    "handler for unknown datapoint {}.{}",
                    self.name, handler.datapoint
                )));
            }
        }

        Ok(Arc::new(FunctionalBlock {
            name: self.name,
            description: self.description,
            datapoints,
            group_objects,
            handlers: self.handlers,
            values: Mutex::new(HashMap::new()),
            ets: RwLock::new(None),
        }))
    }
}
