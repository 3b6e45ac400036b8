use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod ledger;
pub mod lifecycle;
pub mod pricing;
pub mod validator;

pub type BookingId = Uuid;
pub type ListingId = Uuid;
pub type UserId = Uuid;

/// Caller-facing failures of the booking core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("please provide all required fields: `{0}` is missing")]
    MissingField(&'static str),
    #[error("capacity required must be greater than zero")]
    InvalidCapacity,
    #[error("listing not found or not available")]
    ListingUnavailable,
    #[error("start date cannot be in the past")]
    StartDateInPast,
    #[error("end date must be after start date")]
    InvalidDateRange,
    #[error("requested {requested} cubic feet but the listing only holds {total}")]
    ExceedsTotalCapacity { requested: Decimal, total: Decimal },
    #[error("only {remaining} cubic feet available for this period")]
    ExceedsAvailableCapacity { remaining: Decimal },
    #[error("cannot update booking, current status is {current}")]
    InvalidTransition { current: BookingStatus },
    #[error("invalid status, must be \"approved\" or \"rejected\"")]
    InvalidStatus,
    #[error("booking not found")]
    NotFound,
    #[error("booking not found or you do not have permission to update it")]
    Forbidden,
    #[error("access denied, {0} role required")]
    RoleRequired(Role),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingField(_) => "MissingField",
            Error::InvalidCapacity => "InvalidCapacity",
            Error::ListingUnavailable => "ListingUnavailable",
            Error::StartDateInPast => "StartDateInPast",
            Error::InvalidDateRange => "InvalidDateRange",
            Error::ExceedsTotalCapacity { .. } => "ExceedsTotalCapacity",
            Error::ExceedsAvailableCapacity { .. } => "ExceedsAvailableCapacity",
            Error::InvalidTransition { .. } => "InvalidTransition",
            Error::InvalidStatus => "InvalidStatus",
            Error::NotFound => "NotFound",
            Error::Forbidden => "Forbidden",
            Error::RoleRequired(_) => "RoleRequired",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Renter,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Host => "host",
            Role::Renter => "renter",
        })
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(Role::Host),
            "renter" => Ok(Role::Renter),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

/// The authenticated caller, as resolved by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingUser {
    pub id: UserId,
    pub role: Role,
}

impl ActingUser {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn require(&self, role: Role) -> Result<(), Error> {
        if self.role == role {
            Ok(())
        } else {
            Err(Error::RoleRequired(role))
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown value `{0}`")]
pub struct UnknownVariant(pub String);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Inactive,
    Deleted,
}

impl FromStr for ListingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ListingStatus::Active),
            "inactive" => Ok(ListingStatus::Inactive),
            "deleted" => Ok(ListingStatus::Deleted),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

/// Capacity-relevant view of a catalog listing. Read only.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: ListingId,
    pub owner_id: UserId,
    pub total_capacity: Decimal,
    pub price_per_unit_day: Decimal,
    pub status: ListingStatus,
}

impl Listing {
    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }

    pub fn is_owned_by(&self, user: &ActingUser) -> bool {
        self.owner_id == user.id
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Active bookings are the only ones that hold capacity.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "approved" => Ok(BookingStatus::Approved),
            "rejected" => Ok(BookingStatus::Rejected),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(UnknownVariant(other.to_owned())),
        }
    }
}

/// Calendar date range, inclusive on both ends. `end` is always after `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, Error> {
        if end <= start {
            return Err(Error::InvalidDateRange);
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Two ranges conflict when they share at least one calendar day.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    #[cfg(test)]
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Billable days, `end - start`.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub listing_id: ListingId,
    pub renter_id: UserId,
    pub capacity_required: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_price: Decimal,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    /// The charge reference; kept after a refund.
    pub payment_id: Option<String>,
    pub refund_id: Option<String>,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn range(&self) -> DateRange {
        // Every stored booking went through validation, so start < end.
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    pub fn holds_capacity(&self) -> bool {
        self.status.is_active()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::day;
    use super::*;

    #[test]
    fn ranges_sharing_a_boundary_day_overlap() {
        let first = DateRange::new(day(2024, 1, 1), day(2024, 1, 5)).unwrap();
        let second = DateRange::new(day(2024, 1, 5), day(2024, 1, 10)).unwrap();
        assert!(first.overlaps(&second));
        assert!(second.overlaps(&first));
    }

    #[test]
    fn adjacent_ranges_do_not_overlap() {
        let first = DateRange::new(day(2024, 1, 1), day(2024, 1, 5)).unwrap();
        let second = DateRange::new(day(2024, 1, 6), day(2024, 1, 10)).unwrap();
        assert!(!first.overlaps(&second));
        assert!(!second.overlaps(&first));
    }

    #[test]
    fn range_requires_end_after_start() {
        assert_eq!(
            DateRange::new(day(2024, 1, 5), day(2024, 1, 5)),
            Err(Error::InvalidDateRange)
        );
        assert_eq!(
            DateRange::new(day(2024, 1, 5), day(2024, 1, 4)),
            Err(Error::InvalidDateRange)
        );
    }

    #[test]
    fn only_pending_and_approved_are_active() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Approved.is_active());
        for status in [
            BookingStatus::Rejected,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            assert!(!status.is_active(), "{status} should be terminal");
        }
    }

    #[test]
    fn statuses_round_trip_through_their_names() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Approved,
            BookingStatus::Rejected,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<BookingStatus>(), Ok(status));
        }
        assert!("archived".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn role_guard() {
        let renter = ActingUser::new(Uuid::new_v4(), Role::Renter);
        assert_eq!(renter.require(Role::Renter), Ok(()));
        assert_eq!(renter.require(Role::Host), Err(Error::RoleRequired(Role::Host)));
    }
}
