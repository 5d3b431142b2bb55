//! The lease table: allocation engine and single source of truth.
//!
//! The table is a fixed-capacity ledger of (address, hardware address,
//! start, duration, state) records. Entries are appended and never removed;
//! freeing a lease marks its slot `Free` and leaves it in place for reuse.
//! Every operation — including the address pool's occupancy scan — runs
//! under one mutex held only for the duration of the scan or mutation,
//! never across network I/O.
//!
//! Offers are reserved: a Discover marks the chosen address `Offered` for
//! [`OFFER_TIMEOUT_SECONDS`] so a second Discover cannot be handed the same
//! candidate. The reservation is promoted to `Active` by the client's
//! Request or reclaimed once it ages out.
//!
//! Lookups are linear scans over the fixed-capacity table. Duplicate
//! hardware addresses are not deduplicated; the first match wins.

use std::net::Ipv4Addr;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::pool::Pool;

/// How long an offered address stays reserved waiting for the client's
/// Request before the sweeper returns it to the pool.
pub const OFFER_TIMEOUT_SECONDS: i64 = 60;

/// Formats a hardware address as lowercase colon-separated hex.
pub fn format_mac(mac: &[u8; 6]) -> String {
    use std::fmt::Write;
    let mut result = String::with_capacity(17);
    for (index, byte) in mac.iter().enumerate() {
        if index > 0 {
            result.push(':');
        }
        let _ = write!(result, "{:02x}", byte);
    }
    result
}

/// Lifecycle state of a lease slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Slot holds no binding; reusable by the next allocation.
    Free,
    /// Address reserved by a Discover, awaiting the client's Request.
    Offered,
    /// Address confirmed and bound to the hardware address.
    Active,
}

/// One (address, client) binding.
#[derive(Debug, Clone)]
pub struct Lease {
    /// The assigned IPv4 address; unique among non-free slots.
    pub address: Ipv4Addr,

    /// 6-byte client hardware address.
    pub hardware_addr: [u8; 6],

    /// Time of the grant, offer, or last renewal.
    pub lease_start: DateTime<Utc>,

    /// Lease duration in seconds.
    pub duration_secs: u32,

    pub state: LeaseState,
}

impl Lease {
    /// Whether this slot should be reclaimed at `now`.
    ///
    /// An active lease expires once its duration has fully elapsed; an
    /// offered reservation expires after the offer timeout.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.lease_start);
        match self.state {
            LeaseState::Free => false,
            LeaseState::Offered => age > TimeDelta::seconds(OFFER_TIMEOUT_SECONDS),
            LeaseState::Active => age > TimeDelta::seconds(self.duration_secs as i64),
        }
    }

    /// Seconds remaining until expiration at `now`, or 0 if already past.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        let expires_at = self.lease_start + TimeDelta::seconds(self.duration_secs as i64);
        expires_at.signed_duration_since(now).num_seconds().max(0)
    }

    /// The hardware address in canonical display form.
    pub fn mac_string(&self) -> String {
        format_mac(&self.hardware_addr)
    }
}

/// Occupancy counters reported by the statistics task.
#[derive(Debug, Clone, Copy)]
pub struct TableStats {
    pub capacity: usize,
    pub offered: usize,
    pub active: usize,
}

impl TableStats {
    pub fn held(&self) -> usize {
        self.offered + self.active
    }

    pub fn available(&self) -> usize {
        self.capacity - self.held()
    }

    /// Fraction of capacity held by non-free slots.
    pub fn usage(&self) -> f64 {
        self.held() as f64 / self.capacity as f64
    }
}

/// Fixed-capacity, mutex-guarded lease ledger.
///
/// Invariant: at any instant, no two non-free slots share an address.
#[derive(Debug)]
pub struct LeaseTable {
    capacity: usize,
    entries: Mutex<Vec<Lease>>,
}

impl LeaseTable {
    /// Creates an empty table with the given fixed capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Reserves the next available pool address as `Offered` (Discover).
    ///
    /// A client that already holds an offered or active slot is answered
    /// with that same address. Otherwise the pool is scanned in ascending
    /// order and the first address held by no non-free slot is reserved.
    ///
    /// # Errors
    ///
    /// [`Error::PoolExhausted`] when every address in range is held;
    /// [`Error::TableFull`] when the reservation cannot be recorded.
    pub async fn offer_next(
        &self,
        pool: &Pool,
        hardware_addr: [u8; 6],
        duration_secs: u32,
    ) -> Result<Ipv4Addr> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;

        reclaim_expired(&mut entries, now);

        if let Some(existing) = entries
            .iter()
            .find(|lease| lease.hardware_addr == hardware_addr && lease.state != LeaseState::Free)
        {
            return Ok(existing.address);
        }

        let candidate = next_available(&entries, pool).ok_or(Error::PoolExhausted)?;

        let lease = bind_slot(
            &mut entries,
            self.capacity,
            candidate,
            hardware_addr,
            duration_secs,
            LeaseState::Offered,
            now,
        )?;

        Ok(lease.address)
    }

    /// Binds `address` to `hardware_addr` as `Active` (Request).
    ///
    /// Promotes a matching offered slot, reuses a free slot, or appends a
    /// new entry. `lease_start` is set to now.
    ///
    /// # Errors
    ///
    /// [`Error::AddressInUse`] when the address is held by a different
    /// client; [`Error::TableFull`] when capacity is exhausted and no free
    /// slot can be reused.
    pub async fn allocate(
        &self,
        address: Ipv4Addr,
        hardware_addr: [u8; 6],
        duration_secs: u32,
    ) -> Result<Lease> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;

        reclaim_expired(&mut entries, now);

        bind_slot(
            &mut entries,
            self.capacity,
            address,
            hardware_addr,
            duration_secs,
            LeaseState::Active,
            now,
        )
    }

    /// Resets the lease clock for the client's active lease (renewal).
    ///
    /// The first active slot matching the hardware address wins.
    ///
    /// # Errors
    ///
    /// [`Error::LeaseNotFound`] when the client holds no active lease.
    pub async fn renew(&self, hardware_addr: [u8; 6]) -> Result<Lease> {
        let mut entries = self.entries.lock().await;

        let lease = entries
            .iter_mut()
            .find(|lease| {
                lease.hardware_addr == hardware_addr && lease.state == LeaseState::Active
            })
            .ok_or_else(|| Error::LeaseNotFound(format_mac(&hardware_addr)))?;

        lease.lease_start = Utc::now();
        Ok(lease.clone())
    }

    /// Frees the slot holding `address` (Release).
    ///
    /// Releasing an address that is already free or unknown is a no-op and
    /// returns `None`.
    pub async fn release(&self, address: Ipv4Addr) -> Option<Lease> {
        self.free_address(address).await
    }

    /// Frees the slot holding `address` (Decline).
    ///
    /// Same table effect as [`release`](Self::release); the caller logs the
    /// two events differently.
    pub async fn decline(&self, address: Ipv4Addr) -> Option<Lease> {
        self.free_address(address).await
    }

    async fn free_address(&self, address: Ipv4Addr) -> Option<Lease> {
        let mut entries = self.entries.lock().await;

        let lease = entries
            .iter_mut()
            .find(|lease| lease.address == address && lease.state != LeaseState::Free)?;

        lease.state = LeaseState::Free;
        Some(lease.clone())
    }

    /// Frees every slot whose lease or offer has expired at `now`.
    ///
    /// Returns the number of slots freed. Called by the periodic sweeper.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().await;
        reclaim_expired(&mut entries, now)
    }

    /// Returns the client's active lease, if any (first match wins).
    pub async fn active_lease(&self, hardware_addr: [u8; 6]) -> Option<Lease> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .find(|lease| {
                lease.hardware_addr == hardware_addr && lease.state == LeaseState::Active
            })
            .cloned()
    }

    /// A point-in-time copy of every slot, free ones included.
    pub async fn snapshot(&self) -> Vec<Lease> {
        let entries = self.entries.lock().await;
        entries.clone()
    }

    pub async fn stats(&self) -> TableStats {
        let entries = self.entries.lock().await;
        TableStats {
            capacity: self.capacity,
            offered: entries
                .iter()
                .filter(|lease| lease.state == LeaseState::Offered)
                .count(),
            active: entries
                .iter()
                .filter(|lease| lease.state == LeaseState::Active)
                .count(),
        }
    }
}

/// Frees expired slots in place; returns the number freed.
fn reclaim_expired(entries: &mut [Lease], now: DateTime<Utc>) -> usize {
    let mut freed = 0;
    for lease in entries.iter_mut() {
        if lease.is_expired_at(now) {
            lease.state = LeaseState::Free;
            freed += 1;
        }
    }
    freed
}

/// The numerically smallest pool address held by no non-free slot.
fn next_available(entries: &[Lease], pool: &Pool) -> Option<Ipv4Addr> {
    pool.iter().find(|candidate| {
        !entries
            .iter()
            .any(|lease| lease.address == *candidate && lease.state != LeaseState::Free)
    })
}

/// Writes a binding for `address` into the table.
///
/// Reuses the slot already holding the address (same client or free),
/// otherwise any free slot, otherwise appends while capacity allows.
fn bind_slot(
    entries: &mut Vec<Lease>,
    capacity: usize,
    address: Ipv4Addr,
    hardware_addr: [u8; 6],
    duration_secs: u32,
    state: LeaseState,
    now: DateTime<Utc>,
) -> Result<Lease> {
    let lease = Lease {
        address,
        hardware_addr,
        lease_start: now,
        duration_secs,
        state,
    };

    if let Some(slot) = entries.iter_mut().find(|slot| slot.address == address) {
        if slot.state != LeaseState::Free && slot.hardware_addr != hardware_addr {
            return Err(Error::AddressInUse(address));
        }
        *slot = lease.clone();
        return Ok(lease);
    }

    if let Some(slot) = entries
        .iter_mut()
        .find(|slot| slot.state == LeaseState::Free)
    {
        *slot = lease.clone();
        return Ok(lease);
    }

    if entries.len() < capacity {
        entries.push(lease.clone());
        return Ok(lease);
    }

    Err(Error::TableFull)
}
