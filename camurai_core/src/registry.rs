//! The Node Registry - who is where, and how to reach them.
//!
//! Identity is derived solely from the peer's IP address through a static,
//! injected [`AddressTable`]. Each grid cell owns at most one live link: the
//! outbound queue of the connection currently bound to it. Sends are
//! best-effort; a node without a link is routine, not exceptional.

use crate::codec::Frame;
use crate::error::CamuraiError;
use camurai_env::Coord;
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Identifies one bound connection, so a stale handler cannot evict the
/// link of a newer connection to the same node.
pub type LinkId = u64;

/// Static IP → grid coordinate table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressTable {
    entries: HashMap<IpAddr, Coord>,
}

impl AddressTable {
    pub fn new(entries: HashMap<IpAddr, Coord>) -> Self {
        Self { entries }
    }

    /// Row-major table starting at `base`: `base + k` maps to
    /// `(k % width, k / width)`.
    ///
    /// Cells whose address would overflow the last octet are left out.
    pub fn generated(base: Ipv4Addr, width: u16, height: u16) -> Self {
        let [a, b, c, d] = base.octets();
        let mut entries = HashMap::new();

        for k in 0..(width as u32 * height as u32) {
            let Ok(last) = u8::try_from(d as u32 + k) else {
                break;
            };
            let coord = Coord::new((k % width as u32) as u16, (k / width as u32) as u16);
            entries.insert(IpAddr::V4(Ipv4Addr::new(a, b, c, last)), coord);
        }

        Self { entries }
    }

    pub fn resolve(&self, ip: IpAddr) -> Option<Coord> {
        self.entries.get(&ip).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IpAddr, &Coord)> {
        self.entries.iter()
    }
}

/// The live connection bound to a node.
#[derive(Debug)]
struct NodeLink {
    id: LinkId,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// Maps grid cells to their live links.
///
/// Each cell has its own lock; binding one node never contends with
/// another. Locks are never held across an `.await`.
pub struct NodeRegistry {
    width: u16,
    height: u16,
    addresses: AddressTable,
    slots: BTreeMap<Coord, Mutex<Option<NodeLink>>>,
    next_link: AtomicU64,
}

impl NodeRegistry {
    /// Creates a registry with one empty slot per grid cell.
    pub fn new(width: u16, height: u16, addresses: AddressTable) -> Self {
        let slots = (0..height)
            .flat_map(|y| (0..width).map(move |x| Coord::new(x, y)))
            .map(|coord| (coord, Mutex::new(None)))
            .collect();

        Self {
            width,
            height,
            addresses,
            slots,
            next_link: AtomicU64::new(1),
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Every grid cell, connected or not.
    pub fn coords(&self) -> impl Iterator<Item = Coord> + '_ {
        self.slots.keys().copied()
    }

    /// Looks up the coordinate for a peer address.
    pub fn resolve(&self, ip: IpAddr) -> Result<Coord, CamuraiError> {
        self.addresses
            .resolve(ip)
            .filter(|coord| self.slots.contains_key(coord))
            .ok_or(CamuraiError::UnknownAddress(ip))
    }

    /// Attaches an outbound queue to a node, replacing any stale one.
    ///
    /// The replaced link is not closed here; dropping its sender lets its
    /// writer finish, and the old connection's own failure surfaces as a
    /// disconnect.
    pub fn bind(&self, coord: Coord, outbound: mpsc::UnboundedSender<Vec<u8>>) -> LinkId {
        let id = self.next_link.fetch_add(1, Ordering::Relaxed);
        let Some(mut slot) = self.slot(coord) else {
            warn!(x = coord.x, y = coord.y, "bind outside the grid");
            return id;
        };

        if let Some(old) = slot.replace(NodeLink { id, outbound }) {
            warn!(x = coord.x, y = coord.y, old_link = old.id, link = id, "already connected, replacing link");
        }
        id
    }

    /// Clears the node's link if it is still `link`.
    ///
    /// Idempotent. Returns true if a link was removed.
    pub fn unbind(&self, coord: Coord, link: LinkId) -> bool {
        let Some(mut slot) = self.slot(coord) else {
            return false;
        };
        if slot.as_ref().is_some_and(|l| l.id == link) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Queues a frame for a node.
    ///
    /// Never fails: a missing link is logged at warn level, an encoding
    /// error at error level, and the frame is dropped.
    pub fn send(&self, coord: Coord, frame: &Frame) {
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(x = coord.x, y = coord.y, kind = ?frame.kind(), "cannot encode frame: {}", e);
                return;
            }
        };

        let Some(slot) = self.slot(coord) else {
            warn!(x = coord.x, y = coord.y, "send outside the grid");
            return;
        };
        match slot.as_ref() {
            Some(link) if link.outbound.send(bytes).is_ok() => {}
            _ => warn!(x = coord.x, y = coord.y, kind = ?frame.kind(), "not connected"),
        }
    }

    /// Returns true while `link` is the node's bound link.
    pub fn is_current(&self, coord: Coord, link: LinkId) -> bool {
        self.slot(coord)
            .is_some_and(|slot| slot.as_ref().is_some_and(|l| l.id == link))
    }

    /// Returns true if the node has a link whose writer is still running.
    pub fn is_connected(&self, coord: Coord) -> bool {
        self.slot(coord)
            .is_some_and(|slot| slot.as_ref().is_some_and(|l| !l.outbound.is_closed()))
    }

    /// Connected nodes in grid order.
    pub fn connected(&self) -> Vec<Coord> {
        self.coords().filter(|c| self.is_connected(*c)).collect()
    }

    fn slot(&self, coord: Coord) -> Option<MutexGuard<'_, Option<NodeLink>>> {
        self.slots
            .get(&coord)
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 0, last))
    }

    #[test]
    fn test_generated_table_is_row_major() {
        let table = AddressTable::generated(Ipv4Addr::new(192, 168, 0, 200), 4, 4);

        assert_eq!(table.len(), 16);
        assert_eq!(table.resolve(ip(200)), Some(Coord::new(0, 0)));
        assert_eq!(table.resolve(ip(203)), Some(Coord::new(3, 0)));
        assert_eq!(table.resolve(ip(204)), Some(Coord::new(0, 1)));
        assert_eq!(table.resolve(ip(215)), Some(Coord::new(3, 3)));
        assert_eq!(table.resolve(ip(216)), None);
    }

    #[test]
    fn test_generated_table_stops_at_last_octet() {
        let table = AddressTable::generated(Ipv4Addr::new(10, 0, 0, 250), 4, 4);
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn test_resolve_unknown_address() {
        let table = AddressTable::generated(Ipv4Addr::new(192, 168, 0, 200), 4, 4);
        let registry = NodeRegistry::new(4, 4, table);

        assert_eq!(registry.resolve(ip(205)).unwrap(), Coord::new(1, 1));
        assert!(matches!(registry.resolve(ip(1)), Err(CamuraiError::UnknownAddress(_))));
    }

    #[test]
    fn test_resolve_rejects_coords_outside_grid() {
        let mut entries = HashMap::new();
        entries.insert(ip(9), Coord::new(7, 7));
        let registry = NodeRegistry::new(4, 4, AddressTable::new(entries));

        assert!(registry.resolve(ip(9)).is_err());
    }

    #[test]
    fn test_bind_send_unbind() {
        let registry = NodeRegistry::new(2, 2, AddressTable::default());
        let coord = Coord::new(1, 0);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let link = registry.bind(coord, tx);
        assert!(registry.is_connected(coord));
        assert_eq!(registry.connected(), vec![coord]);

        registry.send(coord, &Frame::Lock);
        assert_eq!(rx.try_recv().unwrap(), vec![0x12, 0]);

        assert!(registry.unbind(coord, link));
        assert!(!registry.unbind(coord, link));
        assert!(!registry.is_connected(coord));
    }

    #[test]
    fn test_stale_unbind_keeps_new_link() {
        let registry = NodeRegistry::new(2, 2, AddressTable::default());
        let coord = Coord::new(0, 1);
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        let old = registry.bind(coord, old_tx);
        let new = registry.bind(coord, new_tx);
        assert_ne!(old, new);

        // Old queue is closed once its sender is replaced
        assert!(old_rx.try_recv().is_err());

        assert!(!registry.is_current(coord, old));
        assert!(registry.is_current(coord, new));

        assert!(!registry.unbind(coord, old));
        assert!(registry.is_connected(coord));

        registry.send(coord, &Frame::Unlock);
        assert_eq!(new_rx.try_recv().unwrap(), vec![0x13, 0]);
    }

    #[test]
    fn test_send_without_link_is_quiet_noop() {
        let registry = NodeRegistry::new(2, 2, AddressTable::default());
        registry.send(Coord::new(0, 0), &Frame::Lock);
        registry.send(Coord::new(9, 9), &Frame::Lock);
        registry.send(Coord::new(0, 0), &Frame::Buzzer("A".repeat(400)));
    }

    #[test]
    fn test_closed_writer_counts_as_disconnected() {
        let registry = NodeRegistry::new(2, 2, AddressTable::default());
        let coord = Coord::new(1, 1);
        let (tx, rx) = mpsc::unbounded_channel();
        registry.bind(coord, tx);

        drop(rx);
        assert!(!registry.is_connected(coord));
        assert!(registry.connected().is_empty());
    }
}
