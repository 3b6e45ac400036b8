//! Query side: booking history, host request queues, earnings and
//! availability quotes. Reads take no listing lock and may be slightly stale.

use std::{cmp::Reverse, sync::Arc};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::Error;
use crate::catalog::ListingCatalog;
use crate::domain::{
    ledger::CapacityLedger, pricing, ActingUser, Booking, BookingStatus, DateRange,
    Error as DomainError, Listing, ListingId, Role,
};
use crate::store::BookingStore;

#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn BookingStore>,
    catalog: Arc<dyn ListingCatalog>,
}

impl Repository {
    pub fn new(store: Arc<dyn BookingStore>, catalog: Arc<dyn ListingCatalog>) -> Self {
        Self { store, catalog }
    }

    /// The renter's bookings, newest first, terminal ones included.
    pub async fn my_bookings(&self, actor: ActingUser) -> Result<Vec<Booking>, Error> {
        actor.require(Role::Renter)?;
        let mut bookings = self.store.for_renter(actor.id).await?;
        bookings.sort_by_key(|b| Reverse(b.created_at));
        Ok(bookings)
    }

    /// Every booking on the host's listings, pending first, then newest first.
    pub async fn booking_requests(&self, actor: ActingUser) -> Result<Vec<Booking>, Error> {
        actor.require(Role::Host)?;
        let (_, mut bookings) = self.host_bookings(actor).await?;
        sort_requests(&mut bookings);
        Ok(bookings)
    }

    pub async fn earnings(&self, actor: ActingUser) -> Result<Earnings, Error> {
        actor.require(Role::Host)?;
        let (listings, bookings) = self.host_bookings(actor).await?;
        Ok(Earnings::summarize(&listings, &bookings))
    }

    pub async fn availability(
        &self,
        listing_id: ListingId,
        query: AvailabilityQuery,
    ) -> Result<Availability, Error> {
        let start_date = query.start_date.ok_or(DomainError::MissingField("startDate"))?;
        let end_date = query.end_date.ok_or(DomainError::MissingField("endDate"))?;
        let range = DateRange::new(start_date, end_date)?;
        let listing = self
            .catalog
            .active_listing(listing_id)
            .await?
            .ok_or(DomainError::ListingUnavailable)?;

        let bookings = self.store.for_listings(&[listing_id]).await?;
        let remaining = CapacityLedger::new(&listing, &bookings).remaining_capacity(range, None);
        let quoted_price = match query.capacity_required.map(pricing::to_fixed2) {
            Some(capacity) if capacity <= Decimal::ZERO => {
                return Err(DomainError::InvalidCapacity.into())
            }
            Some(capacity) => Some(pricing::price(capacity, range, listing.price_per_unit_day)),
            None => None,
        };

        Ok(Availability {
            listing_id,
            total_capacity: pricing::floor2(listing.total_capacity),
            remaining,
            start_date,
            end_date,
            quoted_price,
        })
    }

    async fn host_bookings(&self, host: ActingUser) -> Result<(Vec<Listing>, Vec<Booking>), Error> {
        let listings = self.catalog.listings_owned_by(host.id).await?;
        if listings.is_empty() {
            return Ok((listings, Vec::new()));
        }
        let ids: Vec<ListingId> = listings.iter().map(|l| l.id).collect();
        let bookings = self.store.for_listings(&ids).await?;
        Ok((listings, bookings))
    }
}

fn sort_requests(bookings: &mut [Booking]) {
    bookings.sort_by_key(|b| (b.status != BookingStatus::Pending, Reverse(b.created_at)));
}

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Earnings {
    pub total_earnings: Decimal,
    pub active_bookings: usize,
    pub completed_bookings: usize,
    pub pending_requests: usize,
    pub total_listings: usize,
}

impl Earnings {
    fn summarize(listings: &[Listing], bookings: &[Booking]) -> Self {
        let count = |status: BookingStatus| bookings.iter().filter(|b| b.status == status).count();
        let total_earnings = bookings
            .iter()
            .filter(|b| matches!(b.status, BookingStatus::Approved | BookingStatus::Completed))
            .map(|b| b.total_price)
            .sum();
        Self {
            total_earnings: pricing::to_fixed2(total_earnings),
            active_bookings: count(BookingStatus::Approved),
            completed_bookings: count(BookingStatus::Completed),
            pending_requests: count(BookingStatus::Pending),
            total_listings: listings.len(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub capacity_required: Option<Decimal>,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub listing_id: ListingId,
    pub total_capacity: Decimal,
    pub remaining: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_price: Option<Decimal>,
}
