//! Capacity accounting for a single listing, rebuilt from its stored
//! bookings on every decision.

use rust_decimal::Decimal;

use super::{pricing::floor2, Booking, BookingId, DateRange, Listing};

pub struct CapacityLedger<'a> {
    listing: &'a Listing,
    bookings: &'a [Booking],
}

impl<'a> CapacityLedger<'a> {
    pub fn new(listing: &'a Listing, bookings: &'a [Booking]) -> Self {
        Self { listing, bookings }
    }

    /// Active bookings on this listing whose range shares a day with `range`.
    pub fn overlapping(
        &self,
        range: DateRange,
        exclude: Option<BookingId>,
    ) -> impl Iterator<Item = &'a Booking> + '_ {
        let listing_id = self.listing.id;
        self.bookings.iter().filter(move |booking| {
            booking.listing_id == listing_id
                && booking.holds_capacity()
                && Some(booking.id) != exclude
                && booking.range().overlaps(&range)
        })
    }

    pub fn committed(&self, range: DateRange, exclude: Option<BookingId>) -> Decimal {
        self.overlapping(range, exclude)
            .map(|booking| booking.capacity_required)
            .sum()
    }

    /// Exact `total − committed`, floored at zero for listings whose capacity
    /// shrank below what is already booked. Admission compares against this.
    pub fn available(&self, range: DateRange, exclude: Option<BookingId>) -> Decimal {
        let available = self.listing.total_capacity - self.committed(range, exclude);
        available.max(Decimal::ZERO)
    }

    /// [`available`](Self::available) truncated to cents, for display.
    pub fn remaining_capacity(&self, range: DateRange, exclude: Option<BookingId>) -> Decimal {
        floor2(self.available(range, exclude))
    }

    /// Capacity held by active bookings on one calendar day.
    #[cfg(test)]
    pub fn committed_on(&self, day: chrono::NaiveDate) -> Decimal {
        self.bookings
            .iter()
            .filter(|booking| {
                booking.listing_id == self.listing.id
                    && booking.holds_capacity()
                    && booking.range().contains(day)
            })
            .map(|booking| booking.capacity_required)
            .sum()
    }
}
