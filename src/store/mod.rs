//! Booking persistence.
//!
//! Every write goes through a [`ListingSession`], which holds the listing's
//! exclusive lock from `begin` until it is committed or dropped. Capacity
//! reads made inside a session therefore cannot be invalidated by another
//! admission before the write lands.

use async_trait::async_trait;

use crate::domain::{Booking, BookingId, ListingId, UserId};

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("booking {id} is corrupt: {reason}")]
    Corrupt { id: BookingId, reason: String },
    #[error("booking {0} does not belong to the locked listing")]
    OutsideSession(BookingId),
    #[error("booking {0} does not exist")]
    Missing(BookingId),
    #[error("in-memory store lock poisoned")]
    Poisoned,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Locks `listing_id` for a read-then-write unit of work.
    async fn begin(&self, listing_id: ListingId) -> Result<Box<dyn ListingSession>, StoreError>;

    async fn find(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    async fn for_renter(&self, renter_id: UserId) -> Result<Vec<Booking>, StoreError>;

    async fn for_listings(&self, listing_ids: &[ListingId]) -> Result<Vec<Booking>, StoreError>;
}

/// Writes are only visible to others after `commit`. Dropping the session
/// discards them and releases the lock.
#[async_trait]
pub trait ListingSession: Send {
    fn listing_id(&self) -> ListingId;

    async fn booking(&mut self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Pending and approved bookings on the locked listing.
    async fn active_bookings(&mut self) -> Result<Vec<Booking>, StoreError>;

    async fn insert(&mut self, booking: &Booking) -> Result<(), StoreError>;

    async fn update(&mut self, booking: &Booking) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
