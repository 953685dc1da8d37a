//! Flattened Device Tree backend.
//!
//! Per the ARM boot protocol the firmware passes the DTB address in x0 and
//! the DTB stays in memory for the life of the system. The tree is parsed
//! with `fdt_rs` and indexed once so parent and child links can be walked
//! without re-scanning the blob.

use fdt_rs::base::DevTree;
use fdt_rs::index::{DevTreeIndex, DevTreeIndexNode};
use fdt_rs::prelude::*;
use log::{debug, warn};

use super::{DeviceTree, DtError};

/// FDT header magic
const FDT_MAGIC: u32 = 0xd00d_feed;

/// Size of the fixed FDT header
const FDT_HEADER_SIZE: usize = 40;

/// Indexed view of a flattened device tree.
///
/// `'dt` is the lifetime of the blob, `'i` that of the index storage.
pub struct FdtTree<'i, 'dt> {
    index: DevTreeIndex<'i, 'dt>,
}

impl<'i, 'dt> FdtTree<'i, 'dt> {
    /// Bytes of scratch storage [`FdtTree::new`] needs for `blob`.
    pub fn index_size(blob: &'dt [u8]) -> Result<usize, DtError> {
        let devtree = parse(blob)?;
        let layout = DevTreeIndex::get_layout(&devtree)
            .map_err(|_| DtError::NotAvailable("cannot size device tree index"))?;
        Ok(layout.size() + layout.align())
    }

    /// Index `blob` using caller-provided `scratch` storage.
    pub fn new(blob: &'dt [u8], scratch: &'i mut [u8]) -> Result<Self, DtError> {
        let devtree = parse(blob)?;
        let index = DevTreeIndex::new(devtree, scratch)
            .map_err(|_| DtError::NotAvailable("cannot index device tree"))?;
        Ok(Self { index })
    }
}

impl FdtTree<'static, 'static> {
    /// Open the firmware-provided DTB.
    ///
    /// Must be called once before any lookup. The index is allocated on
    /// the heap and kept for the life of the system.
    ///
    /// # Safety
    ///
    /// A non-null `dtb_ptr` must point to a DTB that stays mapped and
    /// unmodified forever.
    ///
    /// # Errors
    ///
    /// [`DtError::NotAvailable`] if the pointer is null, the magic number is
    /// not 0xd00dfeed, or the structure is malformed.
    pub unsafe fn from_firmware(dtb_ptr: *const u8) -> Result<Self, DtError> {
        if dtb_ptr.is_null() {
            warn!("[devtree] no device tree from firmware");
            return Err(DtError::NotAvailable("DTB pointer is null"));
        }

        // SAFETY: caller guarantees a valid DTB, whose header is at least
        // FDT_HEADER_SIZE bytes
        let header = unsafe { core::slice::from_raw_parts(dtb_ptr, FDT_HEADER_SIZE) };
        let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        if magic != FDT_MAGIC {
            warn!("[devtree] bad DTB magic 0x{:08x}", magic);
            return Err(DtError::NotAvailable("invalid DTB magic number"));
        }

        // SAFETY: magic checked, header is readable
        let size = unsafe { DevTree::read_totalsize(header) }
            .map_err(|_| DtError::NotAvailable("failed to read DTB size"))?;

        // SAFETY: totalsize bytes are mapped per the caller's contract
        let blob: &'static [u8] = unsafe { core::slice::from_raw_parts(dtb_ptr, size) };
        let scratch = alloc::vec![0u8; FdtTree::index_size(blob)?].leak();

        debug!("[devtree] DTB at {:p}, {} bytes", dtb_ptr, size);
        Self::new(blob, scratch)
    }
}

fn parse(blob: &[u8]) -> Result<DevTree<'_>, DtError> {
    if blob.len() < FDT_HEADER_SIZE {
        return Err(DtError::NotAvailable("DTB shorter than its header"));
    }
    // SAFETY: DevTree::new validates the header and bounds against the slice
    unsafe { DevTree::new(blob) }.map_err(|_| DtError::NotAvailable("malformed device tree"))
}

impl<'a, 'i, 'dt> DeviceTree for &'a FdtTree<'i, 'dt> {
    type Node = DevTreeIndexNode<'a, 'i, 'dt>;

    fn root(&self) -> Self::Node {
        let tree: &'a FdtTree<'i, 'dt> = *self;
        tree.index.root()
    }

    fn name(&self, node: &Self::Node) -> &str {
        node.name().unwrap_or("")
    }

    fn property(&self, node: &Self::Node, name: &str) -> Option<&[u8]> {
        node.props()
            .find(|prop| prop.name().ok() == Some(name))
            .map(|prop| prop.raw())
    }

    fn parent(&self, node: &Self::Node) -> Option<Self::Node> {
        node.parent()
    }

    fn children(&self, node: &Self::Node) -> impl Iterator<Item = Self::Node> {
        node.children()
    }
}
