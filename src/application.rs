use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::catalog::{CatalogError, ListingCatalog};
use crate::clock::Clock;
use crate::domain::{
    lifecycle::{BookingEvent, Transition},
    pricing, validator, ActingUser, Booking, BookingId, Role,
};
use crate::payment::{PaymentError, PaymentGateway};
use crate::store::{BookingStore, StoreError};

pub use crate::domain::validator::BookingRequest as CreateBooking;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Domain(#[from] crate::domain::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

/// Command side of the booking service. Every method takes the acting user
/// explicitly and runs as one unit of work under the listing's lock.
#[derive(Clone)]
pub struct Application {
    store: Arc<dyn BookingStore>,
    catalog: Arc<dyn ListingCatalog>,
    payments: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
}

impl Application {
    pub fn new(
        store: Arc<dyn BookingStore>,
        catalog: Arc<dyn ListingCatalog>,
        payments: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            payments,
            clock,
        }
    }

    #[instrument(skip_all, fields(renter = %actor.id, listing = ?command.listing_id))]
    pub async fn create_booking(
        &self,
        actor: ActingUser,
        command: CreateBooking,
    ) -> Result<Booking, Error> {
        actor.require(Role::Renter)?;
        let listing_id = command
            .listing_id
            .ok_or(crate::domain::Error::MissingField("listingId"))?;

        // Catalog reads happen before the listing lock is taken.
        let listing = self.catalog.listing(listing_id).await?;
        let mut session = self.store.begin(listing_id).await?;
        let committed = session.active_bookings().await?;

        let request = validator::validate(&command, listing.as_ref(), self.clock.today(), &committed)
            .inspect_err(|err| debug!(%err, "booking request rejected"))?;
        let total_price = pricing::price(
            request.capacity_required,
            request.range,
            request.listing.price_per_unit_day,
        );
        let (booking, event) = Booking::request(
            Uuid::new_v4(),
            actor.id,
            &request,
            total_price,
            self.payments.pending_marker(),
            self.clock.now(),
        );

        session.insert(&booking).await?;
        session.commit().await?;
        info!(?event, "booking requested");
        Ok(booking)
    }

    pub async fn approve_booking(
        &self,
        actor: ActingUser,
        booking_id: BookingId,
    ) -> Result<Booking, Error> {
        self.transition(actor, booking_id, Transition::Approve).await
    }

    pub async fn reject_booking(
        &self,
        actor: ActingUser,
        booking_id: BookingId,
        reason: Option<String>,
    ) -> Result<Booking, Error> {
        let reason = reason
            .map(|reason| reason.trim().to_owned())
            .filter(|reason| !reason.is_empty());
        self.transition(actor, booking_id, Transition::Reject { reason })
            .await
    }

    /// Host decision endpoint: `status` must be `approved` or `rejected`.
    pub async fn update_booking_status(
        &self,
        actor: ActingUser,
        booking_id: BookingId,
        command: UpdateBookingStatus,
    ) -> Result<Booking, Error> {
        match command.status.as_deref() {
            Some("approved") => self.approve_booking(actor, booking_id).await,
            Some("rejected") => {
                self.reject_booking(actor, booking_id, command.rejection_reason)
                    .await
            }
            _ => Err(crate::domain::Error::InvalidStatus.into()),
        }
    }

    pub async fn cancel_booking(
        &self,
        actor: ActingUser,
        booking_id: BookingId,
    ) -> Result<Booking, Error> {
        self.transition(actor, booking_id, Transition::Cancel).await
    }

    pub async fn complete_booking(
        &self,
        actor: ActingUser,
        booking_id: BookingId,
    ) -> Result<Booking, Error> {
        self.transition(actor, booking_id, Transition::Complete)
            .await
    }

    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    async fn transition(
        &self,
        actor: ActingUser,
        booking_id: BookingId,
        transition: Transition,
    ) -> Result<Booking, Error> {
        let listing_id = self
            .store
            .find(booking_id)
            .await?
            .ok_or(crate::domain::Error::NotFound)?
            .listing_id;

        let listing = match actor.role {
            Role::Host => self.catalog.listing(listing_id).await?,
            Role::Renter => None,
        };

        let mut session = self.store.begin(listing_id).await?;
        debug!(listing = %session.listing_id(), "listing locked");
        // Re-read under the lock; the snapshot above may be stale.
        let mut booking = session
            .booking(booking_id)
            .await?
            .ok_or(crate::domain::Error::NotFound)?;
        booking
            .authorize(&transition, &actor, listing.as_ref())
            .inspect_err(|err| debug!(%err, "transition refused"))?;

        let event = self.settle(&booking, transition).await?;
        booking.apply(&event, self.clock.now());
        session.update(&booking).await?;
        session.commit().await?;

        info!(?event, status = %booking.status, "booking transitioned");
        Ok(booking)
    }

    /// Runs the payment side effect of an authorized transition.
    async fn settle(&self, booking: &Booking, transition: Transition) -> Result<BookingEvent, Error> {
        let booking_id = booking.id;
        let event = match transition {
            Transition::Approve => BookingEvent::Approved {
                booking_id,
                payment_id: self.payments.charge(booking).await?.payment_id,
            },
            Transition::Reject { reason } => BookingEvent::Rejected { booking_id, reason },
            Transition::Cancel => {
                let refund_id = if booking.needs_refund() {
                    Some(self.payments.refund(booking).await?.payment_id)
                } else {
                    None
                };
                BookingEvent::Cancelled {
                    booking_id,
                    refund_id,
                }
            }
            Transition::Complete => BookingEvent::Completed { booking_id },
        };
        Ok(event)
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingStatus {
    pub status: Option<String>,
    pub rejection_reason: Option<String>,
}
