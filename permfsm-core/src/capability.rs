//! Interface capability discovery.

use crate::ids::InterfaceId;
use std::collections::BTreeSet;

/// Capability discovery itself.
pub const ERC165_INTERFACE_ID: InterfaceId = InterfaceId::new([0x01, 0xff, 0xc9, 0xa7]);

/// Role-based access control.
pub const ACCESS_CONTROL_INTERFACE_ID: InterfaceId = InterfaceId::new([0x79, 0x65, 0xdb, 0x0b]);

/// Reserved, never supported.
pub const INVALID_INTERFACE_ID: InterfaceId = InterfaceId::new([0xff; 4]);

/// Set of supported interface ids.
#[derive(Debug, Clone)]
pub struct Capabilities {
    interfaces: BTreeSet<InterfaceId>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            interfaces: [ERC165_INTERFACE_ID, ACCESS_CONTROL_INTERFACE_ID]
                .into_iter()
                .collect(),
        }
    }
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an interface. Returns false for the reserved id or a repeat.
    pub fn register(&mut self, id: InterfaceId) -> bool {
        id != INVALID_INTERFACE_ID && self.interfaces.insert(id)
    }

    pub fn supports(&self, id: InterfaceId) -> bool {
        self.interfaces.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        self.interfaces.iter().copied()
    }
}
