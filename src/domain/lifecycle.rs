//! Booking state machine.
//!
//! ```text
//! pending ──approve──▶ approved ──complete──▶ completed
//!    │                    │
//!    ├──reject──▶ rejected│
//!    └──cancel──▶ cancelled ◀──cancel──┘
//! ```
//!
//! Deciding a transition (`authorize`) is separate from recording it
//! (`apply`): the caller settles any payment in between, then applies the
//! resulting event so status and payment status change in one step.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{
    validator::ValidatedRequest, ActingUser, Booking, BookingId, BookingStatus, Error, Listing,
    PaymentStatus, Role, UserId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Approve,
    Reject { reason: Option<String> },
    Cancel,
    Complete,
}

impl Transition {
    fn role(&self) -> Role {
        match self {
            Transition::Cancel => Role::Renter,
            Transition::Approve | Transition::Reject { .. } | Transition::Complete => Role::Host,
        }
    }

    fn allowed_from(&self, status: BookingStatus) -> bool {
        match self {
            Transition::Approve | Transition::Reject { .. } => status == BookingStatus::Pending,
            Transition::Cancel => status.is_active(),
            Transition::Complete => status == BookingStatus::Approved,
        }
    }
}

/// What a transition did. Written to the log, never persisted; the booking
/// row stays the record of truth.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BookingEvent {
    Requested {
        booking_id: BookingId,
        total_price: Decimal,
    },
    Approved {
        booking_id: BookingId,
        payment_id: String,
    },
    Rejected {
        booking_id: BookingId,
        reason: Option<String>,
    },
    Cancelled {
        booking_id: BookingId,
        refund_id: Option<String>,
    },
    Completed {
        booking_id: BookingId,
    },
}

impl Booking {
    /// Opens a booking for an admitted request in `pending`/`pending`.
    pub fn request(
        id: BookingId,
        renter_id: UserId,
        request: &ValidatedRequest<'_>,
        total_price: Decimal,
        payment_marker: String,
        now: DateTime<Utc>,
    ) -> (Booking, BookingEvent) {
        let booking = Booking {
            id,
            listing_id: request.listing.id,
            renter_id,
            capacity_required: request.capacity_required,
            start_date: request.range.start(),
            end_date: request.range.end(),
            total_price,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_id: Some(payment_marker),
            refund_id: None,
            notes: request.notes.clone(),
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        let event = BookingEvent::Requested {
            booking_id: id,
            total_price,
        };
        (booking, event)
    }

    /// Checks role, ownership and current status for `transition`.
    ///
    /// Host transitions need the booking's listing to check ownership; a
    /// listing the catalog no longer knows is treated as not owned.
    pub fn authorize(
        &self,
        transition: &Transition,
        actor: &ActingUser,
        listing: Option<&Listing>,
    ) -> Result<(), Error> {
        actor.require(transition.role())?;

        let owns = match transition.role() {
            Role::Renter => self.renter_id == actor.id,
            Role::Host => listing
                .map(|listing| listing.id == self.listing_id && listing.is_owned_by(actor))
                .unwrap_or(false),
        };
        if !owns {
            return Err(Error::Forbidden);
        }

        if !transition.allowed_from(self.status) {
            return Err(Error::InvalidTransition {
                current: self.status,
            });
        }
        Ok(())
    }

    /// Whether cancelling now has to give money back.
    pub fn needs_refund(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    /// Records an authorized transition.
    pub fn apply(&mut self, event: &BookingEvent, at: DateTime<Utc>) {
        match event {
            BookingEvent::Requested { .. } => return,
            BookingEvent::Approved { payment_id, .. } => {
                self.status = BookingStatus::Approved;
                self.payment_status = PaymentStatus::Paid;
                self.payment_id = Some(payment_id.clone());
            }
            BookingEvent::Rejected { reason, .. } => {
                self.status = BookingStatus::Rejected;
                self.rejection_reason = reason.clone();
            }
            BookingEvent::Cancelled { refund_id, .. } => {
                self.status = BookingStatus::Cancelled;
                if let Some(refund_id) = refund_id {
                    self.payment_status = PaymentStatus::Refunded;
                    self.refund_id = Some(refund_id.clone());
                }
            }
            BookingEvent::Completed { .. } => {
                self.status = BookingStatus::Completed;
            }
        }
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::domain::fixtures::{booking, day, listing};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap()
    }

    fn host_of(listing: &Listing) -> ActingUser {
        ActingUser::new(listing.owner_id, Role::Host)
    }

    fn renter_of(booking: &Booking) -> ActingUser {
        ActingUser::new(booking.renter_id, Role::Renter)
    }

    fn pending(listing: &Listing) -> Booking {
        booking(
            listing,
            dec!(10),
            day(2024, 1, 5),
            day(2024, 1, 8),
            BookingStatus::Pending,
        )
    }

    #[test]
    fn request_opens_a_pending_booking() {
        let listing = listing(dec!(100), dec!(2.50));
        let validated = ValidatedRequest {
            listing: &listing,
            capacity_required: dec!(10),
            range: crate::domain::DateRange::new(day(2024, 1, 1), day(2024, 1, 4)).unwrap(),
            notes: None,
        };
        let renter = Uuid::new_v4();
        let (booking, event) = Booking::request(
            Uuid::new_v4(),
            renter,
            &validated,
            dec!(75.00),
            "MOCK_PAY_PENDING_1".into(),
            now(),
        );
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
        assert_eq!(booking.payment_id.as_deref(), Some("MOCK_PAY_PENDING_1"));
        assert_eq!(booking.renter_id, renter);
        assert_eq!(booking.listing_id, listing.id);
        assert_eq!(
            event,
            BookingEvent::Requested {
                booking_id: booking.id,
                total_price: dec!(75.00)
            }
        );
    }

    #[test]
    fn owner_can_approve_pending() {
        let listing = listing(dec!(100), dec!(1));
        let mut booking = pending(&listing);
        booking
            .authorize(&Transition::Approve, &host_of(&listing), Some(&listing))
            .unwrap();

        booking.apply(
            &BookingEvent::Approved {
                booking_id: booking.id,
                payment_id: "MOCK_PAY_7".into(),
            },
            now(),
        );
        assert_eq!(booking.status, BookingStatus::Approved);
        assert_eq!(booking.payment_status, PaymentStatus::Paid);
        assert_eq!(booking.payment_id.as_deref(), Some("MOCK_PAY_7"));
        assert_eq!(booking.updated_at, now());
    }

    #[test]
    fn approving_twice_is_an_invalid_transition() {
        let listing = listing(dec!(100), dec!(1));
        let mut booking = pending(&listing);
        booking.status = BookingStatus::Approved;
        assert_eq!(
            booking.authorize(&Transition::Approve, &host_of(&listing), Some(&listing)),
            Err(Error::InvalidTransition {
                current: BookingStatus::Approved
            })
        );
    }

    #[test]
    fn only_the_listing_owner_decides() {
        let listing = listing(dec!(100), dec!(1));
        let booking = pending(&listing);
        let stranger = ActingUser::new(Uuid::new_v4(), Role::Host);
        for transition in [
            Transition::Approve,
            Transition::Reject { reason: None },
            Transition::Complete,
        ] {
            assert_eq!(
                booking.authorize(&transition, &stranger, Some(&listing)),
                Err(Error::Forbidden)
            );
        }
        assert_eq!(
            booking.authorize(&Transition::Approve, &host_of(&listing), None),
            Err(Error::Forbidden)
        );
    }

    #[test]
    fn renters_cannot_approve() {
        let listing = listing(dec!(100), dec!(1));
        let booking = pending(&listing);
        assert_eq!(
            booking.authorize(&Transition::Approve, &renter_of(&booking), Some(&listing)),
            Err(Error::RoleRequired(Role::Host))
        );
    }

    #[test]
    fn reject_records_reason() {
        let listing = listing(dec!(100), dec!(1));
        let mut booking = pending(&listing);
        let transition = Transition::Reject {
            reason: Some("maintenance".into()),
        };
        booking
            .authorize(&transition, &host_of(&listing), Some(&listing))
            .unwrap();
        booking.apply(
            &BookingEvent::Rejected {
                booking_id: booking.id,
                reason: Some("maintenance".into()),
            },
            now(),
        );
        assert_eq!(booking.status, BookingStatus::Rejected);
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
        assert_eq!(booking.rejection_reason.as_deref(), Some("maintenance"));
    }

    #[test]
    fn renter_cancels_pending_without_refund() {
        let listing = listing(dec!(100), dec!(1));
        let mut booking = pending(&listing);
        booking
            .authorize(&Transition::Cancel, &renter_of(&booking), None)
            .unwrap();
        assert!(!booking.needs_refund());
        booking.apply(
            &BookingEvent::Cancelled {
                booking_id: booking.id,
                refund_id: None,
            },
            now(),
        );
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
    }

    #[test]
    fn cancelling_a_paid_booking_refunds_it() {
        let listing = listing(dec!(100), dec!(1));
        let mut booking = pending(&listing);
        booking.status = BookingStatus::Approved;
        booking.payment_status = PaymentStatus::Paid;
        booking.payment_id = Some("MOCK_PAY_3".into());
        booking
            .authorize(&Transition::Cancel, &renter_of(&booking), None)
            .unwrap();
        assert!(booking.needs_refund());
        booking.apply(
            &BookingEvent::Cancelled {
                booking_id: booking.id,
                refund_id: Some("MOCK_REFUND_1".into()),
            },
            now(),
        );
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert_eq!(booking.payment_status, PaymentStatus::Refunded);
        assert_eq!(booking.payment_id.as_deref(), Some("MOCK_PAY_3"));
        assert_eq!(booking.refund_id.as_deref(), Some("MOCK_REFUND_1"));
    }

    #[test]
    fn only_the_renter_may_cancel() {
        let listing = listing(dec!(100), dec!(1));
        let booking = pending(&listing);
        let other = ActingUser::new(Uuid::new_v4(), Role::Renter);
        assert_eq!(
            booking.authorize(&Transition::Cancel, &other, None),
            Err(Error::Forbidden)
        );
        assert_eq!(
            booking.authorize(&Transition::Cancel, &host_of(&listing), Some(&listing)),
            Err(Error::RoleRequired(Role::Renter))
        );
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let listing = listing(dec!(100), dec!(1));
        for status in [
            BookingStatus::Rejected,
            BookingStatus::Cancelled,
            BookingStatus::Completed,
        ] {
            let mut booking = pending(&listing);
            booking.status = status;
            let expected = Err(Error::InvalidTransition { current: status });
            assert_eq!(
                booking.authorize(&Transition::Cancel, &renter_of(&booking), None),
                expected
            );
            for transition in [
                Transition::Approve,
                Transition::Reject { reason: None },
                Transition::Complete,
            ] {
                assert_eq!(
                    booking.authorize(&transition, &host_of(&listing), Some(&listing)),
                    expected
                );
            }
        }
    }

    #[test]
    fn complete_requires_approval_first() {
        let listing = listing(dec!(100), dec!(1));
        let mut booking = pending(&listing);
        assert_eq!(
            booking.authorize(&Transition::Complete, &host_of(&listing), Some(&listing)),
            Err(Error::InvalidTransition {
                current: BookingStatus::Pending
            })
        );
        booking.status = BookingStatus::Approved;
        booking
            .authorize(&Transition::Complete, &host_of(&listing), Some(&listing))
            .unwrap();
        booking.apply(&BookingEvent::Completed { booking_id: booking.id }, now());
        assert_eq!(booking.status, BookingStatus::Completed);
        assert!(!booking.holds_capacity());
    }
}
