use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use async_trait::async_trait;
use tokio::sync::{Mutex as ListingLock, OwnedMutexGuard};

use super::{BookingStore, ListingSession, StoreError};
use crate::domain::{Booking, BookingId, ListingId, UserId};

type Bookings = Arc<RwLock<HashMap<BookingId, Booking>>>;

/// Process-local store. Listing locks are async mutexes created on first use.
#[derive(Default)]
pub struct InMemoryStore {
    bookings: Bookings,
    locks: Mutex<HashMap<ListingId, Arc<ListingLock<()>>>>,
}

impl InMemoryStore {
    fn lock_for(&self, listing_id: ListingId) -> Result<Arc<ListingLock<()>>, StoreError> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(Arc::clone(locks.entry(listing_id).or_default()))
    }

    /// Whether a session currently holds `listing_id`.
    #[cfg(test)]
    pub fn is_locked(&self, listing_id: ListingId) -> bool {
        self.locks
            .lock()
            .unwrap()
            .get(&listing_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    fn select(&self, keep: impl Fn(&Booking) -> bool) -> Result<Vec<Booking>, StoreError> {
        let bookings = self.bookings.read().map_err(|_| StoreError::Poisoned)?;
        Ok(bookings.values().filter(|b| keep(b)).cloned().collect())
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn begin(&self, listing_id: ListingId) -> Result<Box<dyn ListingSession>, StoreError> {
        let lock = self.lock_for(listing_id)?;
        let guard = lock.lock_owned().await;
        Ok(Box::new(MemorySession {
            listing_id,
            _guard: guard,
            bookings: Arc::clone(&self.bookings),
            staged: HashMap::new(),
        }))
    }

    async fn find(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let bookings = self.bookings.read().map_err(|_| StoreError::Poisoned)?;
        Ok(bookings.get(&id).cloned())
    }

    async fn for_renter(&self, renter_id: UserId) -> Result<Vec<Booking>, StoreError> {
        self.select(|b| b.renter_id == renter_id)
    }

    async fn for_listings(&self, listing_ids: &[ListingId]) -> Result<Vec<Booking>, StoreError> {
        self.select(|b| listing_ids.contains(&b.listing_id))
    }
}

struct MemorySession {
    listing_id: ListingId,
    _guard: OwnedMutexGuard<()>,
    bookings: Bookings,
    staged: HashMap<BookingId, Booking>,
}

impl MemorySession {
    fn committed(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let bookings = self.bookings.read().map_err(|_| StoreError::Poisoned)?;
        Ok(bookings
            .get(&id)
            .filter(|b| b.listing_id == self.listing_id)
            .cloned())
    }

    fn check_listing(&self, booking: &Booking) -> Result<(), StoreError> {
        if booking.listing_id == self.listing_id {
            Ok(())
        } else {
            Err(StoreError::OutsideSession(booking.id))
        }
    }
}

#[async_trait]
impl ListingSession for MemorySession {
    fn listing_id(&self) -> ListingId {
        self.listing_id
    }

    async fn booking(&mut self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        match self.staged.get(&id) {
            Some(booking) => Ok(Some(booking.clone())),
            None => self.committed(id),
        }
    }

    async fn active_bookings(&mut self) -> Result<Vec<Booking>, StoreError> {
        let mut merged: HashMap<BookingId, Booking> = {
            let bookings = self.bookings.read().map_err(|_| StoreError::Poisoned)?;
            bookings
                .values()
                .filter(|b| b.listing_id == self.listing_id)
                .map(|b| (b.id, b.clone()))
                .collect()
        };
        merged.extend(self.staged.iter().map(|(id, b)| (*id, b.clone())));
        Ok(merged
            .into_values()
            .filter(Booking::holds_capacity)
            .collect())
    }

    async fn insert(&mut self, booking: &Booking) -> Result<(), StoreError> {
        self.check_listing(booking)?;
        self.staged.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update(&mut self, booking: &Booking) -> Result<(), StoreError> {
        self.check_listing(booking)?;
        if !self.staged.contains_key(&booking.id) && self.committed(booking.id)?.is_none() {
            return Err(StoreError::Missing(booking.id));
        }
        self.staged.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemorySession {
            _guard: guard,
            bookings,
            staged,
            ..
        } = *self;
        bookings
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .extend(staged);
        drop(guard);
        Ok(())
    }
}
