//! The binding layer: the "ETS" role.
//!
//! Owns the GAD map, the registry of functional blocks, and the woven
//! binding tables: `gad -> bindings` for inbound traffic and
//! `(block, datapoint) -> bindings` for local writes. Implements the
//! application layer's listener and enforces the C/R/W/T/U flag gates.
//!
//! The tables are read-mostly: mutations happen only in `register`,
//! `weave` and `unweave`, which must not run concurrently with stack
//! traffic. Transmissions and notifications are issued after the table
//! lock is released, so handlers may freely write datapoints again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};

use log::{debug, info, warn};

use crate::addressing::{AddressStyle, GroupAddress, IndividualAddress};
use crate::binding::device::{Device, DeviceState};
use crate::binding::functional_block::FunctionalBlock;
use crate::binding::gad_map::GadMap;
use crate::binding::group_object::GroupObject;
use crate::dpt::{GroupData, Value};
use crate::error::{KnxError, Result};
use crate::protocol::Priority;
use crate::services::notifier::Notifier;
use crate::stack::{ApplicationGroupDataService, GroupValueListener, TransmissionResult};

struct Binding {
    fb: Arc<FunctionalBlock>,
    object: GroupObject,
    app: Weak<ApplicationGroupDataService>,
}

#[derive(Default)]
struct Inner {
    /// Registered blocks, by unique name.
    blocks: HashMap<String, Arc<FunctionalBlock>>,
    /// All woven bindings.
    bindings: Vec<Binding>,
    /// Inbound index: raw GAD -> binding indices.
    by_gad: HashMap<u16, Vec<usize>>,
    /// Outbound index: (block, datapoint) -> binding indices.
    by_dp: HashMap<(String, String), Vec<usize>>,
}

/// The registry and binding service.
pub struct Ets {
    gad_map: GadMap,
    notifier: Arc<Notifier>,
    inner: RwLock<Inner>,
}

impl Ets {
    /// Create the service around a GAD map and a notifier.
    pub fn new(gad_map: GadMap, notifier: Arc<Notifier>) -> Arc<Self> {
        Arc::new(Self {
            gad_map,
            notifier,
            inner: RwLock::new(Inner::default()),
        })
    }

    /// The GAD map.
    pub const fn gad_map(&self) -> &GadMap {
        &self.gad_map
    }

    /// The notifier this service dispatches through.
    pub const fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Register a device's blocks.
    ///
    /// # Errors
    ///
    /// `ConfigErrorKind::DuplicateBlock` if any block name is already
    /// registered; `ConfigErrorKind::BadState` unless the device is
    /// freshly created.
    pub fn register(&self, device: &Device) -> Result<()> {
        let blocks = device.blocks();
        {
            let inner = self.inner.read().expect("binding table poisoned");
            for fb in &blocks {
                if inner.blocks.contains_key(fb.name()) {
                    return Err(KnxError::duplicate_block(fb.name()));
                }
            }
        }
        device.transition(DeviceState::Created, DeviceState::Registered)?;

        let mut inner = self.inner.write().expect("binding table poisoned");
        for fb in blocks {
            inner.blocks.insert(fb.name().to_owned(), fb);
        }
        info!("registered device {}", device.name());
        Ok(())
    }

    /// Weave a registered device: resolve every group object against the
    /// GAD map, install the bindings, register the handlers and attach
    /// the stack listener. Idempotent on an already woven device.
    ///
    /// # Errors
    ///
    /// `ConfigErrorKind::DanglingReference` for a link name missing from
    /// the GAD map; `ConfigErrorKind::BadState` for an unregistered
    /// device. On error no binding is installed.
    pub fn weave(self: &Arc<Self>, device: &Device) -> Result<()> {
        if device.state() == DeviceState::Woven {
            debug!("device {} already woven", device.name());
            return Ok(());
        }

        let blocks = device.blocks();
        let app = Arc::downgrade(device.stack().application());

        // Resolve everything before touching the tables
        let mut new_bindings = Vec::new();
        for fb in &blocks {
            for spec in fb.group_objects() {
                let mut gads = Vec::new();
                for link in spec.link_names() {
                    let gad = self.gad_map.lookup(link).ok_or_else(|| {
                        KnxError::dangling_reference(format!(
                            "group object {}.{} links unmapped name {:?}",
                            fb.name(),
                            spec.datapoint,
                            link
                        ))
                    })?;
                    gads.push(gad);
                }
                new_bindings.push(Binding {
                    fb: Arc::clone(fb),
                    object: GroupObject {
                        spec: spec.clone(),
                        gads,
                    },
                    app: Weak::clone(&app),
                });
            }
        }

        device.transition(DeviceState::Registered, DeviceState::Woven)?;

        {
            let mut inner = self.inner.write().expect("binding table poisoned");
            for binding in new_bindings {
                let index = inner.bindings.len();
                let key = (
                    binding.fb.name().to_owned(),
                    binding.object.spec.datapoint.clone(),
                );
                for gad in &binding.object.gads {
                    inner.by_gad.entry(gad.raw()).or_default().push(index);
                }
                inner.by_dp.entry(key).or_default().push(index);
                inner.bindings.push(binding);
            }
        }

        for fb in &blocks {
            self.notifier.register_block(fb);
            fb.attach(Arc::downgrade(self));
        }
        device
            .stack()
            .application()
            .set_listener(Arc::downgrade(self) as Weak<dyn GroupValueListener>);

        info!("woven device {} ({} blocks)", device.name(), blocks.len());
        Ok(())
    }

    /// Remove a device's bindings and handlers.
    ///
    /// Must not run concurrently with stack traffic.
    pub fn unweave(&self, device: &Device) {
        let blocks = device.blocks();
        let names: HashSet<&str> = blocks.iter().map(|fb| fb.name()).collect();

        let mut inner = self.inner.write().expect("binding table poisoned");
        let mut kept = Vec::new();
        for binding in inner.bindings.drain(..) {
            if !names.contains(binding.fb.name()) {
                kept.push(binding);
            }
        }
        inner.by_gad.clear();
        inner.by_dp.clear();
        for (index, binding) in kept.iter().enumerate() {
            let key = (
                binding.fb.name().to_owned(),
                binding.object.spec.datapoint.clone(),
            );
            for gad in &binding.object.gads {
                inner.by_gad.entry(gad.raw()).or_default().push(index);
            }
            inner.by_dp.entry(key).or_default().push(index);
        }
        inner.bindings = kept;
        drop(inner);

        for fb in &blocks {
            self.notifier.unregister_block(fb.name());
            fb.detach();
        }
        debug!("unwoven device {}", device.name());
    }

    /// Local write path: transmit through every `C`+`T` object of the
    /// datapoint when the value changed, then notify.
    pub(crate) fn local_datapoint_write(
        &self,
        fb: &FunctionalBlock,
        datapoint: &str,
        old: Value,
        new: Value,
    ) {
        let mut sends: Vec<(Weak<ApplicationGroupDataService>, GroupAddress, Priority, GroupData)> =
            Vec::new();

        if old != new {
            let inner = self.inner.read().expect("binding table poisoned");
            let key = (fb.name().to_owned(), datapoint.to_owned());
            for &index in inner.by_dp.get(&key).into_iter().flatten() {
                let binding = &inner.bindings[index];
                let Some(gad) = binding.object.sending_gad() else {
                    continue;
                };
                let Some(dp) = binding.fb.datapoint(datapoint) else {
                    continue;
                };
                match dp.xlator().encode(&new) {
                    Ok(data) => sends.push((
                        Weak::clone(&binding.app),
                        gad,
                        binding.object.spec.priority,
                        data,
                    )),
                    Err(err) => warn!("{}.{datapoint}: unencodable value: {err}", fb.name()),
                }
            }
        }

        for (app, gad, priority, data) in sends {
            let Some(app) = app.upgrade() else {
                continue;
            };
            match app.group_value_write_req(gad, priority, &data) {
                TransmissionResult::Ok => {}
                other => warn!(
                    "group write to {gad} for {}.{datapoint}: {other:?}",
                    fb.name()
                ),
            }
        }

        self.notifier
            .datapoint_notify(fb.name(), datapoint, old, new);
    }

    /// Render the group-object address table.
    pub fn groat(&self, style: AddressStyle) -> String {
        use std::fmt::Write;

        let inner = self.inner.read().expect("binding table poisoned");
        let mut rows: Vec<(u16, String, String, &'static str, String, &'static str)> = Vec::new();
        for binding in &inner.bindings {
            let dpt = binding
                .fb
                .datapoint(&binding.object.spec.datapoint)
                .map_or("?", |dp| dp.xlator().identifier());
            for gad in &binding.object.gads {
                rows.push((
                    gad.raw(),
                    gad.format(style).as_str().to_owned(),
                    format!("{}.{}", binding.fb.name(), binding.object.spec.datapoint),
                    dpt,
                    binding.object.spec.flags.to_string(),
                    binding.object.spec.priority.name(),
                ));
            }
        }
        rows.sort();

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<12} {:<32} {:<8} {:<6} {:<8}",
            "gad", "datapoint", "dpt", "flags", "priority"
        );
        for (_, gad, dp, dpt, flags, priority) in rows {
            let _ = writeln!(out, "{gad:<12} {dp:<32} {dpt:<8} {flags:<6} {priority:<8}");
        }
        out
    }

    fn fan_out<F>(&self, gad: GroupAddress, gate: F, data: &GroupData)
    where
        F: Fn(&crate::binding::group_object::Flags) -> bool,
    {
        let mut updates: Vec<(String, String, Value, Value)> = Vec::new();
        {
            let inner = self.inner.read().expect("binding table poisoned");
            let mut touched: HashSet<(String, String)> = HashSet::new();
            for &index in inner.by_gad.get(&gad.raw()).into_iter().flatten() {
                let binding = &inner.bindings[index];
                let flags = &binding.object.spec.flags;
                if !(flags.communicate && gate(flags)) {
                    continue;
                }
                let dp_name = binding.object.spec.datapoint.clone();
                // One update per (block, datapoint), even when several
                // objects share the pair
                if !touched.insert((binding.fb.name().to_owned(), dp_name.clone())) {
                    continue;
                }
                let Some(dp) = binding.fb.datapoint(&dp_name) else {
                    continue;
                };
                let value = match dp.xlator().decode(data) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!("{gad}: payload does not decode for {}.{dp_name}: {err}",
                            binding.fb.name());
                        continue;
                    }
                };
                if let Some((old, new)) = binding.fb.update_from_bus(&dp_name, value) {
                    updates.push((binding.fb.name().to_owned(), dp_name, old, new));
                }
            }
        }

        for (fb_name, dp_name, old, new) in updates {
            self.notifier.datapoint_notify(&fb_name, &dp_name, old, new);
        }
    }
}

impl GroupValueListener for Ets {
    fn group_value_write_ind(
        &self,
        _source: IndividualAddress,
        gad: GroupAddress,
        _priority: Priority,
        data: &GroupData,
    ) {
        self.fan_out(gad, |flags| flags.write, data);
    }

    fn group_value_read_ind(
        &self,
        _source: IndividualAddress,
        gad: GroupAddress,
        _priority: Priority,
    ) {
        // Every C+R object answers; objects without R stay silent.
        let mut responses: Vec<(Weak<ApplicationGroupDataService>, Priority, GroupData)> =
            Vec::new();
        {
            let inner = self.inner.read().expect("binding table poisoned");
            for &index in inner.by_gad.get(&gad.raw()).into_iter().flatten() {
                let binding = &inner.bindings[index];
                let flags = &binding.object.spec.flags;
                if !(flags.communicate && flags.read) {
                    continue;
                }
                let dp_name = &binding.object.spec.datapoint;
                let Some(dp) = binding.fb.datapoint(dp_name) else {
                    continue;
                };
                let Ok(value) = binding.fb.value(dp_name) else {
                    continue;
                };
                match dp.xlator().encode(&value) {
                    Ok(data) => responses.push((
                        Weak::clone(&binding.app),
                        binding.object.spec.priority,
                        data,
                    )),
                    Err(err) => {
                        warn!("{}.{dp_name}: unencodable value: {err}", binding.fb.name());
                    }
                }
            }
        }

        for (app, priority, data) in responses {
            let Some(app) = app.upgrade() else {
                continue;
            };
            match app.group_value_response_req(gad, priority, &data) {
                TransmissionResult::Ok => {}
                other => warn!("group response to {gad}: {other:?}"),
            }
        }
    }

    fn group_value_response_ind(
        &self,
        _source: IndividualAddress,
        gad: GroupAddress,
        _priority: Priority,
        data: &GroupData,
    ) {
        self.fan_out(gad, |flags| flags.update, data);
    }
}

impl std::fmt::Debug for Ets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().expect("binding table poisoned");
        f.debug_struct("Ets")
            .field("blocks", &inner.blocks.len())
            .field("bindings", &inner.bindings.len())
            .finish_non_exhaustive()
    }
}
