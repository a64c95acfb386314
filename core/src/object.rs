// Copyright 2019 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! The LWM2M object/instance registry (C7).
//!
//! Grounded on `examples/original_source/apps/oma-lwm2m/lwm2m-engine.c`'s object instance
//! list and `lwm2m_engine_recommend_instance_id`. The original represents both "this object
//! type exists but has no instance yet" and "this is instance N" with one struct, using the
//! sentinel `instance_id == LWM2M_OBJECT_INSTANCE_NONE` (0xFFFF) to mean the former. Per the
//! design's redesign flag, this is rendered as a tagged enum instead, and entries live in an
//! arena (`Vec<Option<Instance>>` with a free list) keyed by a `u16` handle rather than an
//! intrusive linked list.

use crate::codecs::LwM2mValue;
use crate::dispatcher::LwM2mStatus;
use crate::Error;
use std::collections::{BTreeMap, HashMap};

/// Handle to an arena slot, returned by [`ObjectRegistry::create_instance`] and
/// [`ObjectRegistry::register_template`].
pub type InstanceHandle = u16;

/// Per-resource R/W/X capability bits, mirroring the flag bits packed into
/// `lwm2m_engine.c`'s `resource_ids[]` entries (`RSC_READABLE`/`RSC_WRITABLE`/the
/// implicit "executable means no value" rule for single resources).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceAccess(u8);

impl ResourceAccess {
    pub const READABLE: ResourceAccess = ResourceAccess(0b001);
    pub const WRITABLE: ResourceAccess = ResourceAccess(0b010);
    pub const EXECUTABLE: ResourceAccess = ResourceAccess(0b100);

    /// The default given to a resource that was written a value without ever being
    /// declared: readable and writable, matching the original's "plain data resource"
    /// default.
    pub const READ_WRITE: ResourceAccess = ResourceAccess(0b011);

    pub const fn union(self, other: ResourceAccess) -> ResourceAccess {
        ResourceAccess(self.0 | other.0)
    }

    pub fn contains(self, other: ResourceAccess) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ResourceAccess {
    type Output = ResourceAccess;

    fn bitor(self, rhs: ResourceAccess) -> ResourceAccess {
        self.union(rhs)
    }
}

/// An executable resource's handler, invoked with the EXECUTE payload (§4.7). Boxed since
/// each instance may wire up a different closure per resource id.
pub type ExecuteHandler = Box<dyn FnMut(&[u8]) -> LwM2mStatus>;

/// One entry in the registry: either a concrete, addressable object instance, or a template
/// recording that an object type is supported even though no instance of it exists yet.
pub enum Instance {
    /// A concrete instance with a real instance id and its resource values.
    Concrete {
        oid: u16,
        iid: u16,
        resources: BTreeMap<u16, LwM2mValue>,
        access: BTreeMap<u16, ResourceAccess>,
        executables: BTreeMap<u16, ExecuteHandler>,
        /// Resource id -> number of instances, for multi-instance resources (Discover's
        /// `dim=N` attribute, §4.7).
        dim: BTreeMap<u16, u16>,
    },

    /// An object type registered with the client but with no instance created yet.
    Template { oid: u16, resources: BTreeMap<u16, LwM2mValue>, access: BTreeMap<u16, ResourceAccess> },
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instance::Concrete { oid, iid, resources, access, dim, .. } => f
                .debug_struct("Instance::Concrete")
                .field("oid", oid)
                .field("iid", iid)
                .field("resources", resources)
                .field("access", access)
                .field("dim", dim)
                .finish(),
            Instance::Template { oid, resources, access } => f
                .debug_struct("Instance::Template")
                .field("oid", oid)
                .field("resources", resources)
                .field("access", access)
                .finish(),
        }
    }
}

impl Instance {
    /// The object id this entry belongs to.
    pub fn oid(&self) -> u16 {
        match self {
            Instance::Concrete { oid, .. } | Instance::Template { oid, .. } => *oid,
        }
    }

    /// The instance id, or `None` for a [`Instance::Template`].
    pub fn iid(&self) -> Option<u16> {
        match self {
            Instance::Concrete { iid, .. } => Some(*iid),
            Instance::Template { .. } => None,
        }
    }

    /// Read-only access to this instance's resource values.
    pub fn resources(&self) -> &BTreeMap<u16, LwM2mValue> {
        match self {
            Instance::Concrete { resources, .. } | Instance::Template { resources, .. } => resources,
        }
    }

    /// Mutable access to this instance's resource values.
    pub fn resources_mut(&mut self) -> &mut BTreeMap<u16, LwM2mValue> {
        match self {
            Instance::Concrete { resources, .. } | Instance::Template { resources, .. } => resources,
        }
    }

    /// The access flags declared for `rid`, or [`ResourceAccess::READ_WRITE`] if none were
    /// ever declared (a plain data resource written without a prior `set_access` call).
    pub fn access_of(&self, rid: u16) -> ResourceAccess {
        let access = match self {
            Instance::Concrete { access, .. } | Instance::Template { access, .. } => access,
        };
        access.get(&rid).copied().unwrap_or(ResourceAccess::READ_WRITE)
    }

    /// Declares the access flags for `rid`. Call before populating the resource if it should
    /// be executable or read-only.
    pub fn set_access(&mut self, rid: u16, flags: ResourceAccess) {
        match self {
            Instance::Concrete { access, .. } | Instance::Template { access, .. } => {
                access.insert(rid, flags);
            }
        }
    }

    /// Registers `rid` as executable (§4.7, `LWM2M_OP_EXECUTE`) with the given handler.
    /// No-op on a [`Instance::Template`], which has no instance id to execute against yet.
    pub fn set_executable(&mut self, rid: u16, handler: ExecuteHandler) {
        if let Instance::Concrete { access, executables, .. } = self {
            access.insert(rid, ResourceAccess::EXECUTABLE);
            executables.insert(rid, handler);
        }
    }

    /// Invokes `rid`'s execute handler, if any, with `args`.
    pub fn execute(&mut self, rid: u16, args: &[u8]) -> Option<LwM2mStatus> {
        match self {
            Instance::Concrete { executables, .. } => executables.get_mut(&rid).map(|handler| handler(args)),
            Instance::Template { .. } => None,
        }
    }

    /// Declares that `rid` is a multi-instance resource with `count` resource instances, for
    /// Discover's `dim=N` attribute.
    pub fn set_dim(&mut self, rid: u16, count: u16) {
        if let Instance::Concrete { dim, .. } = self {
            dim.insert(rid, count);
        }
    }

    /// The declared dimension of `rid`, if it was registered via [`Instance::set_dim`].
    pub fn dim_of(&self, rid: u16) -> Option<u16> {
        match self {
            Instance::Concrete { dim, .. } => dim.get(&rid).copied(),
            Instance::Template { .. } => None,
        }
    }
}

/// The object/instance registry (C7).
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    slots: Vec<Option<Instance>>,
    free: Vec<InstanceHandle>,
    by_oid_iid: HashMap<(u16, u16), InstanceHandle>,
}

impl ObjectRegistry {
    pub fn new() -> ObjectRegistry {
        ObjectRegistry::default()
    }

    /// Registers an object type with no instance yet (e.g. a single-instance object declared
    /// at startup before its resources are populated).
    pub fn register_template(&mut self, oid: u16) -> InstanceHandle {
        self.insert(Instance::Template { oid, resources: BTreeMap::new(), access: BTreeMap::new() })
    }

    /// Creates a concrete instance `oid/iid`. Errors if that instance already exists.
    pub fn create_instance(&mut self, oid: u16, iid: u16) -> Result<InstanceHandle, Error> {
        if self.by_oid_iid.contains_key(&(oid, iid)) {
            return Err(Error::InvalidArgument);
        }
        let handle = self.insert(Instance::Concrete {
            oid,
            iid,
            resources: BTreeMap::new(),
            access: BTreeMap::new(),
            executables: BTreeMap::new(),
            dim: BTreeMap::new(),
        });
        self.by_oid_iid.insert((oid, iid), handle);
        Ok(handle)
    }

    /// Finds the registered [`Instance::Template`] for `oid`, if any — used by the dispatcher's
    /// create-by-write handling (§4.8) to look up the prototype when no concrete instance
    /// exists yet.
    pub fn find_template(&self, oid: u16) -> Option<&Instance> {
        self.slots
            .iter()
            .flatten()
            .find(|inst| inst.oid() == oid && matches!(inst, Instance::Template { .. }))
    }

    /// Deletes every concrete instance of every object, leaving registered templates intact
    /// (the bootstrap-interface "delete everything" request, §4.8).
    pub fn delete_all(&mut self) {
        let handles: Vec<InstanceHandle> = self.by_oid_iid.values().copied().collect();
        for handle in handles {
            self.slots[handle as usize] = None;
            self.free.push(handle);
        }
        self.by_oid_iid.clear();
    }

    /// Deletes the concrete instance `oid/iid`, if present. Returns whether it existed.
    pub fn delete_instance(&mut self, oid: u16, iid: u16) -> bool {
        match self.by_oid_iid.remove(&(oid, iid)) {
            Some(handle) => {
                self.slots[handle as usize] = None;
                self.free.push(handle);
                true
            }
            None => false,
        }
    }

    /// Looks up `oid/iid`.
    pub fn find(&self, oid: u16, iid: u16) -> Option<&Instance> {
        let handle = *self.by_oid_iid.get(&(oid, iid))?;
        self.slots[handle as usize].as_ref()
    }

    /// Mutable lookup of `oid/iid`.
    pub fn find_mut(&mut self, oid: u16, iid: u16) -> Option<&mut Instance> {
        let handle = *self.by_oid_iid.get(&(oid, iid))?;
        self.slots[handle as usize].as_mut()
    }

    /// Every concrete instance of `oid`, in unspecified order.
    pub fn instances_of(&self, oid: u16) -> impl Iterator<Item = &Instance> {
        self.slots.iter().flatten().filter(move |inst| inst.oid() == oid && inst.iid().is_some())
    }

    /// Every registered entry, concrete instances and bare templates alike, in unspecified
    /// order. Used to enumerate the supported object/instance list for registration (§4.9,
    /// `lwm2m_engine_get_rd_data`).
    pub fn all(&self) -> impl Iterator<Item = &Instance> {
        self.slots.iter().flatten()
    }

    /// Recommends an instance id for a new instance of `oid`, matching
    /// `lwm2m_engine_recommend_instance_id`: one below the lowest existing id if there's room
    /// below it, otherwise one above the highest.
    pub fn recommend_instance_id(&self, oid: u16) -> u16 {
        let mut min_id = u16::MAX;
        let mut max_id = 0u16;
        let mut found = false;

        for inst in self.instances_of(oid) {
            found = true;
            let iid = inst.iid().expect("instances_of only yields concrete instances");
            min_id = min_id.min(iid);
            max_id = max_id.max(iid);
        }

        if !found {
            0
        } else if min_id > 0 {
            min_id - 1
        } else {
            max_id + 1
        }
    }

    fn insert(&mut self, instance: Instance) -> InstanceHandle {
        if let Some(handle) = self.free.pop() {
            self.slots[handle as usize] = Some(instance);
            handle
        } else {
            self.slots.push(Some(instance));
            (self.slots.len() - 1) as InstanceHandle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommend_instance_id_prefers_the_gap_below() {
        let mut registry = ObjectRegistry::new();
        registry.create_instance(1, 2).unwrap();
        registry.create_instance(1, 3).unwrap();
        assert_eq!(registry.recommend_instance_id(1), 1);
    }

    #[test]
    fn recommend_instance_id_falls_back_above_when_no_room_below() {
        let mut registry = ObjectRegistry::new();
        registry.create_instance(1, 0).unwrap();
        registry.create_instance(1, 1).unwrap();
        assert_eq!(registry.recommend_instance_id(1), 2);
    }

    #[test]
    fn recommend_instance_id_with_no_instances_is_zero() {
        let registry = ObjectRegistry::new();
        assert_eq!(registry.recommend_instance_id(3), 0);
    }

    #[test]
    fn create_find_delete_round_trip() {
        let mut registry = ObjectRegistry::new();
        registry.create_instance(3, 0).unwrap();
        assert!(registry.find(3, 0).is_some());
        assert!(registry.create_instance(3, 0).is_err());
        assert!(registry.delete_instance(3, 0));
        assert!(registry.find(3, 0).is_none());
        assert!(!registry.delete_instance(3, 0));
    }

    #[test]
    fn template_has_no_instance_id() {
        let mut registry = ObjectRegistry::new();
        let handle = registry.register_template(5);
        assert!(registry.slots[handle as usize].as_ref().unwrap().iid().is_none());
    }
}
