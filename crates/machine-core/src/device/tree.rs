//! Static device hierarchy.
//!
//! Tags are paths: a child of `soundboard` tagged `ym` is addressed as
//! `soundboard:ym`. The tree is frozen once the machine is built.

use core::cell::RefCell;
use std::collections::HashMap;

use crate::{ClockRate, ConfigError, Device, DeviceId};

/// Separator between tag path segments.
pub const TAG_SEPARATOR: char = ':';

/// One configured device.
#[derive(Debug)]
pub struct DeviceNode {
    tag: String,
    type_name: String,
    clock: ClockRate,
    parent: Option<DeviceId>,
    children: Vec<DeviceId>,
    device: RefCell<Box<dyn Device>>,
}

impl DeviceNode {
    /// Full path tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Registry type name, or the Rust type name for directly added instances.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Configured clock.
    #[must_use]
    pub const fn clock(&self) -> ClockRate {
        self.clock
    }

    /// Parent device.
    #[must_use]
    pub const fn parent(&self) -> Option<DeviceId> {
        self.parent
    }

    /// Direct children in insertion order.
    #[must_use]
    pub fn children(&self) -> &[DeviceId] {
        &self.children
    }

    /// Device cell. Borrow failures mean the device is already executing
    /// further up the call stack.
    #[must_use]
    pub const fn cell(&self) -> &RefCell<Box<dyn Device>> {
        &self.device
    }
}

/// All devices of one machine, in insertion order.
#[derive(Debug, Default)]
pub struct DeviceTree {
    nodes: Vec<DeviceNode>,
    by_tag: HashMap<String, DeviceId>,
}

impl DeviceTree {
    /// Empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when no device is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Builds the full path tag a device named `tag` gets under `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTag`] for empty segments and
    /// [`ConfigError::UnknownParent`] for foreign parent handles.
    pub fn full_tag(&self, tag: &str, parent: Option<DeviceId>) -> Result<String, ConfigError> {
        if tag.is_empty() || tag.split(TAG_SEPARATOR).any(str::is_empty) {
            return Err(ConfigError::InvalidTag(tag.to_owned()));
        }
        match parent {
            None => Ok(tag.to_owned()),
            Some(parent) => {
                let node = self
                    .get(parent)
                    .ok_or(ConfigError::UnknownParent(parent.as_u32()))?;
                Ok(format!("{}{TAG_SEPARATOR}{tag}", node.tag))
            }
        }
    }

    /// Adds a device under `parent`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid or duplicate tag or an unknown parent.
    pub fn add(
        &mut self,
        tag: &str,
        type_name: &str,
        clock: ClockRate,
        parent: Option<DeviceId>,
        device: Box<dyn Device>,
    ) -> Result<DeviceId, ConfigError> {
        let full = self.full_tag(tag, parent)?;
        if self.by_tag.contains_key(&full) {
            return Err(ConfigError::DuplicateTag(full));
        }
        let index = u32::try_from(self.nodes.len())
            .map_err(|_| ConfigError::TooManyDevices(full.clone()))?;
        let id = DeviceId::from_index(index);
        if let Some(parent) = parent.and_then(|parent| self.nodes.get_mut(parent.index())) {
            parent.children.push(id);
        }
        self.by_tag.insert(full.clone(), id);
        self.nodes.push(DeviceNode {
            tag: full,
            type_name: type_name.to_owned(),
            clock,
            parent,
            children: Vec::new(),
            device: RefCell::new(device),
        });
        Ok(id)
    }

    /// Looks a device up by full path tag. Absence is not an error.
    #[must_use]
    pub fn find(&self, tag: &str) -> Option<DeviceId> {
        self.by_tag.get(tag).copied()
    }

    /// Resolves `tag` relative to `origin`: first as a child of `origin`,
    /// then as a sibling, then as a full path.
    #[must_use]
    pub fn find_from(&self, origin: DeviceId, tag: &str) -> Option<DeviceId> {
        let node = self.get(origin)?;
        let child = format!("{}{TAG_SEPARATOR}{tag}", node.tag);
        let sibling = node
            .parent
            .and_then(|parent| self.get(parent))
            .map(|parent| format!("{}{TAG_SEPARATOR}{tag}", parent.tag));
        self.find(&child)
            .or_else(|| sibling.and_then(|sibling| self.find(&sibling)))
            .or_else(|| self.find(tag))
    }

    /// Node by handle.
    #[must_use]
    pub fn get(&self, id: DeviceId) -> Option<&DeviceNode> {
        self.nodes.get(id.index())
    }

    /// Full tag of a device, or an empty string for foreign handles.
    #[must_use]
    pub fn tag(&self, id: DeviceId) -> &str {
        self.get(id).map_or("", DeviceNode::tag)
    }

    /// Devices in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &DeviceNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| {
                u32::try_from(index)
                    .ok()
                    .map(|index| (DeviceId::from_index(index), node))
            })
    }
}
