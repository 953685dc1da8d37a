//! Device Tree Lookups
//!
//! Locates peripheral register blocks through the boot-provided device tree.
//! The tree itself is owned by the platform (see [`fdt::FdtTree`]); this
//! module only walks it through the [`DeviceTree`] cursor and never copies it.
//!
//! # Address Translation
//!
//! Device tree `reg` properties hold **bus addresses** as seen by the child
//! bus. The parent bus maps them through its `ranges` table of
//! `(child base, parent base, size)` records:
//!
//! ```text
//! soc {
//!     #address-cells = <1>;
//!     #size-cells = <1>;
//!     ranges = <0x7e000000 0x3f000000 0x01000000>;
//!
//!     mailbox@7e00b880 {
//!         reg = <0x7e00b880 0x40>;
//!     };
//! };
//! ```
//!
//! Here the mailbox at bus address 0x7E00B880 is at ARM address 0x3F00B880.
//! Cell widths come from `#address-cells`/`#size-cells` (default 2). Values
//! are combined high cell first and truncated to 32 bits.
//!
//! # References
//!
//! - [Devicetree Specification](https://devicetree-specification.readthedocs.io/)
//! - [BCM283x Device Tree](https://github.com/raspberrypi/linux/tree/rpi-6.6.y/arch/arm/boot/dts/broadcom)

pub mod fdt;

#[cfg(test)]
pub(crate) mod testing;

use core::fmt;
use log::{trace, warn};

use crate::error::ErrorKind;

pub use fdt::FdtTree;

/// Default `#address-cells`/`#size-cells` when a node does not say
const DEFAULT_CELLS: u32 = 2;

/// Device tree lookup errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtError {
    /// The platform did not provide a usable device tree
    NotAvailable(&'static str),
    /// No `/aliases` node
    NoAliases,
    /// Alias not defined under `/aliases`
    AliasNotFound,
    /// Path does not name a node, or the node has no parent
    NodeNotFound,
    /// Required property absent
    MissingProperty(&'static str),
    /// Property present but too short or not in the expected format
    InvalidProperty(&'static str),
    /// No `ranges` record covers the address
    NoTranslation { address: u32 },
}

impl DtError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DeviceNotFound
    }
}

impl fmt::Display for DtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DtError::NotAvailable(why) => write!(f, "device tree not available: {}", why),
            DtError::NoAliases => write!(f, "device tree has no /aliases node"),
            DtError::AliasNotFound => write!(f, "alias not found"),
            DtError::NodeNotFound => write!(f, "node not found"),
            DtError::MissingProperty(name) => write!(f, "missing property \"{}\"", name),
            DtError::InvalidProperty(name) => write!(f, "malformed property \"{}\"", name),
            DtError::NoTranslation { address } => {
                write!(f, "no translation for address 0x{:08x}", address)
            }
        }
    }
}

/// Cursor over a device tree owned by someone else.
///
/// Node handles are cheap to clone and stay valid for as long as the tree
/// is borrowed. Property values are raw big-endian bytes.
pub trait DeviceTree {
    type Node: Clone;

    fn root(&self) -> Self::Node;

    /// Node name including any `@unit-address` suffix; empty for the root.
    fn name(&self, node: &Self::Node) -> &str;

    fn property(&self, node: &Self::Node, name: &str) -> Option<&[u8]>;

    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    /// Direct children in tree order.
    fn children(&self, node: &Self::Node) -> impl Iterator<Item = Self::Node>;

    /// Open a node by absolute path.
    ///
    /// A path component without `@unit` matches the first child whose name
    /// before `@` is equal to it.
    fn open(&self, path: &str) -> Option<Self::Node> {
        let rest = path.strip_prefix('/')?;
        let mut node = self.root();

        for component in rest.split('/').filter(|c| !c.is_empty()) {
            let next = self
                .children(&node)
                .find(|child| component_matches(self.name(child), component))?;
            node = next;
        }

        Some(node)
    }

    /// Release a node handle. Backends that pin nodes override this.
    fn close(&self, _node: Self::Node) {}
}

fn component_matches(name: &str, component: &str) -> bool {
    if name == component {
        return true;
    }
    !component.contains('@') && name.split('@').next() == Some(component)
}

/// Combine `cells` big-endian 32-bit cells, high cell first.
///
/// More than two cells keep only the low 64 bits; missing cells are ignored.
pub fn read_cells(bytes: &[u8], cells: u32) -> u64 {
    bytes
        .chunks_exact(4)
        .take(cells as usize)
        .fold(0u64, |value, cell| {
            (value << 32) | u32::from_be_bytes([cell[0], cell[1], cell[2], cell[3]]) as u64
        })
}

fn be_u32(bytes: &[u8]) -> Option<u32> {
    let cell = bytes.get(..4)?;
    Some(u32::from_be_bytes([cell[0], cell[1], cell[2], cell[3]]))
}

/// Path stored under `/aliases` for `alias`.
pub fn alias_path<'t, T: DeviceTree>(tree: &'t T, alias: &str) -> Result<&'t str, DtError> {
    let Some(aliases) = tree.open("/aliases") else {
        warn!("[devtree] no /aliases node");
        return Err(DtError::NoAliases);
    };

    let value = tree.property(&aliases, alias);
    tree.close(aliases);

    let Some(value) = value else {
        warn!("[devtree] alias {} not found", alias);
        return Err(DtError::AliasNotFound);
    };

    let value = match value.iter().position(|&b| b == 0) {
        Some(nul) => &value[..nul],
        None => value,
    };
    core::str::from_utf8(value).map_err(|_| DtError::InvalidProperty("alias"))
}

/// Open the node an alias points at.
pub fn resolve_alias<T: DeviceTree>(tree: &T, alias: &str) -> Result<T::Node, DtError> {
    let path = alias_path(tree, alias)?;
    tree.open(path).ok_or_else(|| {
        warn!("[devtree] failed to open {} for alias {}", path, alias);
        DtError::NodeNotFound
    })
}

/// First 32-bit value of property `name`.
///
/// Looks on `node`, then on its ancestors if `search_ancestors` is set. A
/// missing node, missing property or value shorter than a cell yields
/// `default`.
pub fn property_u32<T: DeviceTree>(
    tree: &T,
    node: Option<&T::Node>,
    name: &str,
    default: u32,
    search_ancestors: bool,
) -> u32 {
    let mut current = node.cloned();

    while let Some(node) = current {
        if let Some(value) = tree.property(&node, name) {
            return be_u32(value).unwrap_or(default);
        }
        if !search_ancestors {
            break;
        }
        current = tree.parent(&node);
    }

    default
}

/// Map `address` on the bus below `node` to the bus above it.
///
/// `ranges` records are `(child address, parent address, size)` with widths
/// from `node`'s `#address-cells`, its parent's `#address-cells` and
/// `node`'s `#size-cells`. The first record containing `address` wins. An
/// empty `ranges` property is an identity mapping.
pub fn translate_address<T: DeviceTree>(
    tree: &T,
    address: u32,
    node: &T::Node,
) -> Result<u32, DtError> {
    let Some(ranges) = tree.property(node, "ranges") else {
        warn!("[devtree] no ranges to translate 0x{:08x}", address);
        return Err(DtError::NoTranslation { address });
    };

    if ranges.is_empty() {
        return Ok(address);
    }

    let parent = tree.parent(node);
    let parent_cells = property_u32(tree, parent.as_ref(), "#address-cells", DEFAULT_CELLS, false);
    let child_cells = property_u32(tree, Some(node), "#address-cells", DEFAULT_CELLS, false);
    let size_cells = property_u32(tree, Some(node), "#size-cells", DEFAULT_CELLS, false);

    let child_len = child_cells as usize * 4;
    let parent_len = parent_cells as usize * 4;
    let record_len = child_len + parent_len + size_cells as usize * 4;
    if record_len == 0 {
        return Err(DtError::InvalidProperty("ranges"));
    }

    for record in ranges.chunks_exact(record_len) {
        let child_base = read_cells(&record[..child_len], child_cells) as u32;
        let parent_base = read_cells(&record[child_len..child_len + parent_len], parent_cells) as u32;
        let size = read_cells(&record[child_len + parent_len..], size_cells);
        trace!(
            "[devtree] range child=0x{:08x} parent=0x{:08x} size=0x{:08x}",
            child_base, parent_base, size
        );

        if address >= child_base && (address as u64) < child_base as u64 + size {
            let translated = address.wrapping_add(parent_base.wrapping_sub(child_base));
            trace!("[devtree] 0x{:08x} -> 0x{:08x}", address, translated);
            return Ok(translated);
        }
    }

    warn!("[devtree] no translation found for address 0x{:08x}", address);
    Err(DtError::NoTranslation { address })
}

/// First `reg` address of the aliased node, decoded with the parent's
/// `#address-cells`, and the node itself.
fn first_reg_address<T: DeviceTree>(tree: &T, alias: &str) -> Result<(T::Node, T::Node, u32), DtError> {
    let node = resolve_alias(tree, alias)?;
    let Some(parent) = tree.parent(&node) else {
        tree.close(node);
        return Err(DtError::NodeNotFound);
    };

    let cells = property_u32(tree, Some(&parent), "#address-cells", DEFAULT_CELLS, false);
    let reg = match tree.property(&node, "reg") {
        Some(reg) => reg,
        None => {
            warn!("[devtree] no reg property for alias {}", alias);
            tree.close(node);
            return Err(DtError::MissingProperty("reg"));
        }
    };

    let needed = cells as usize * 4;
    if reg.len() < needed {
        tree.close(node);
        return Err(DtError::InvalidProperty("reg"));
    }

    let address = read_cells(&reg[..needed], cells) as u32;
    Ok((node, parent, address))
}

/// CPU-visible base address of the aliased device.
///
/// Decodes the first `reg` address using the **parent's** `#address-cells`
/// and translates it through the parent's `ranges`.
pub fn base_address_virtual<T: DeviceTree>(tree: &T, alias: &str) -> Result<usize, DtError> {
    let (node, parent, address) = first_reg_address(tree, alias)?;
    let translated = translate_address(tree, address, &parent);
    tree.close(node);
    translated.map(|address| address as usize)
}

/// Untranslated bus address of the aliased device (low cell of the first
/// `reg` address).
pub fn base_address<T: DeviceTree>(tree: &T, alias: &str) -> Result<usize, DtError> {
    let (node, _parent, address) = first_reg_address(tree, alias)?;
    tree.close(node);
    Ok(address as usize)
}

/// Depth-first, pre-order search below (and including) `node` for the node
/// whose `phandle` equals `phandle`.
///
/// A node is checked before its children and children are visited in tree
/// order, so duplicate phandles resolve to the first one in that order.
pub fn find_by_phandle<T: DeviceTree>(tree: &T, node: &T::Node, phandle: u32) -> Option<T::Node> {
    if tree.property(node, "phandle").and_then(be_u32) == Some(phandle) {
        return Some(node.clone());
    }

    for child in tree.children(node) {
        if let Some(found) = find_by_phandle(tree, &child, phandle) {
            return Some(found);
        }
    }

    None
}
