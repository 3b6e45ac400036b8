use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{
    ledger::CapacityLedger,
    pricing::{floor2, to_fixed2},
    Booking, DateRange, Error, Listing, ListingId,
};

/// A renter's booking request as it arrives, before any checks.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub listing_id: Option<ListingId>,
    pub capacity_required: Option<Decimal>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// A request that passed every admission check against `listing`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest<'a> {
    pub listing: &'a Listing,
    pub capacity_required: Decimal,
    pub range: DateRange,
    pub notes: Option<String>,
}

/// Runs the admission checks in order; the first failure wins.
///
/// `committed` must be read under the listing's lock by the caller so that
/// the capacity observed here is still true when the booking is written.
pub fn validate<'a>(
    request: &BookingRequest,
    listing: Option<&'a Listing>,
    today: NaiveDate,
    committed: &[Booking],
) -> Result<ValidatedRequest<'a>, Error> {
    let (capacity_required, start, end) = required_fields(request)?;

    let listing = listing
        .filter(|listing| listing.is_active())
        .ok_or(Error::ListingUnavailable)?;

    if start < today {
        return Err(Error::StartDateInPast);
    }
    let range = DateRange::new(start, end)?;

    if capacity_required > listing.total_capacity {
        return Err(Error::ExceedsTotalCapacity {
            requested: capacity_required,
            total: floor2(listing.total_capacity),
        });
    }

    let ledger = CapacityLedger::new(listing, committed);
    if capacity_required > ledger.available(range, None) {
        return Err(Error::ExceedsAvailableCapacity {
            remaining: ledger.remaining_capacity(range, None),
        });
    }

    Ok(ValidatedRequest {
        listing,
        capacity_required,
        range,
        notes: request
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(str::to_owned),
    })
}

fn required_fields(request: &BookingRequest) -> Result<(Decimal, NaiveDate, NaiveDate), Error> {
    if request.listing_id.is_none() {
        return Err(Error::MissingField("listingId"));
    }
    let capacity_required = request
        .capacity_required
        .ok_or(Error::MissingField("capacityRequired"))?;
    let start = request.start_date.ok_or(Error::MissingField("startDate"))?;
    let end = request.end_date.ok_or(Error::MissingField("endDate"))?;

    let capacity_required = to_fixed2(capacity_required);
    if capacity_required <= Decimal::ZERO {
        return Err(Error::InvalidCapacity);
    }
    Ok((capacity_required, start, end))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::{
        fixtures::{booking, day, listing},
        BookingStatus, ListingStatus,
    };

    fn request(listing: &Listing, capacity: Decimal, start: NaiveDate, end: NaiveDate) -> BookingRequest {
        BookingRequest {
            listing_id: Some(listing.id),
            capacity_required: Some(capacity),
            start_date: Some(start),
            end_date: Some(end),
            notes: None,
        }
    }

    fn today() -> NaiveDate {
        day(2024, 1, 1)
    }

    #[test]
    fn accepts_a_request_within_capacity() {
        let listing = listing(dec!(100), dec!(2.50));
        let req = BookingRequest {
            notes: Some("  frozen peas  ".into()),
            ..request(&listing, dec!(10), day(2024, 1, 1), day(2024, 1, 4))
        };
        let validated = validate(&req, Some(&listing), today(), &[]).unwrap();
        assert_eq!(validated.capacity_required, dec!(10));
        assert_eq!(validated.range.days(), 3);
        assert_eq!(validated.notes.as_deref(), Some("frozen peas"));
        assert_eq!(validated.listing.id, listing.id);
    }

    #[test]
    fn reports_first_missing_field() {
        let listing = listing(dec!(100), dec!(1));
        let full = request(&listing, dec!(10), day(2024, 1, 2), day(2024, 1, 3));

        let cases = [
            (BookingRequest::default(), "listingId"),
            (
                BookingRequest {
                    capacity_required: None,
                    start_date: None,
                    ..full.clone()
                },
                "capacityRequired",
            ),
            (
                BookingRequest {
                    start_date: None,
                    ..full.clone()
                },
                "startDate",
            ),
            (
                BookingRequest {
                    end_date: None,
                    ..full.clone()
                },
                "endDate",
            ),
        ];
        for (req, field) in cases {
            assert_eq!(
                validate(&req, Some(&listing), today(), &[]),
                Err(Error::MissingField(field))
            );
        }
    }

    #[test]
    fn missing_fields_win_over_missing_listing() {
        let req = BookingRequest {
            listing_id: Some(uuid::Uuid::new_v4()),
            ..BookingRequest::default()
        };
        assert_eq!(
            validate(&req, None, today(), &[]),
            Err(Error::MissingField("capacityRequired"))
        );
    }

    #[test]
    fn rejects_non_positive_capacity() {
        let listing = listing(dec!(100), dec!(1));
        for capacity in [dec!(0), dec!(-5), dec!(0.004), dec!(-0.001)] {
            let req = request(&listing, capacity, day(2024, 1, 2), day(2024, 1, 3));
            assert_eq!(
                validate(&req, Some(&listing), today(), &[]),
                Err(Error::InvalidCapacity)
            );
        }
    }

    #[test]
    fn listing_must_exist_and_be_active() {
        let mut inactive = listing(dec!(100), dec!(1));
        let req = request(&inactive, dec!(10), day(2024, 1, 2), day(2024, 1, 3));
        assert_eq!(
            validate(&req, None, today(), &[]),
            Err(Error::ListingUnavailable)
        );

        for status in [ListingStatus::Inactive, ListingStatus::Deleted] {
            inactive.status = status;
            assert_eq!(
                validate(&req, Some(&inactive), today(), &[]),
                Err(Error::ListingUnavailable)
            );
        }
    }

    #[test]
    fn start_date_cannot_be_in_the_past() {
        let listing = listing(dec!(100), dec!(1));
        let req = request(&listing, dec!(10), day(2023, 12, 31), day(2024, 1, 3));
        assert_eq!(
            validate(&req, Some(&listing), today(), &[]),
            Err(Error::StartDateInPast)
        );
    }

    #[test]
    fn end_date_must_follow_start_date() {
        let listing = listing(dec!(100), dec!(1));
        let same_day = request(&listing, dec!(10), day(2024, 1, 3), day(2024, 1, 3));
        assert_eq!(
            validate(&same_day, Some(&listing), today(), &[]),
            Err(Error::InvalidDateRange)
        );
        let reversed = request(&listing, dec!(10), day(2024, 1, 3), day(2024, 1, 2));
        assert_eq!(
            validate(&reversed, Some(&listing), today(), &[]),
            Err(Error::InvalidDateRange)
        );
    }

    #[test]
    fn past_start_is_reported_before_bad_range() {
        let listing = listing(dec!(100), dec!(1));
        let req = request(&listing, dec!(10), day(2023, 12, 1), day(2023, 11, 1));
        assert_eq!(
            validate(&req, Some(&listing), today(), &[]),
            Err(Error::StartDateInPast)
        );
    }

    #[test]
    fn capacity_above_listing_total_fails_fast() {
        let listing = listing(dec!(100), dec!(1));
        let req = request(&listing, dec!(100.01), day(2024, 1, 2), day(2024, 1, 3));
        assert_eq!(
            validate(&req, Some(&listing), today(), &[]),
            Err(Error::ExceedsTotalCapacity {
                requested: dec!(100.01),
                total: dec!(100),
            })
        );
    }

    #[test]
    fn over_capacity_reports_remaining_and_exact_fit_succeeds() {
        let listing = listing(dec!(100), dec!(1));
        let committed = vec![booking(
            &listing,
            dec!(60),
            day(2024, 1, 1),
            day(2024, 1, 10),
            BookingStatus::Approved,
        )];

        let too_big = request(&listing, dec!(50), day(2024, 1, 5), day(2024, 1, 7));
        let err = validate(&too_big, Some(&listing), today(), &committed).unwrap_err();
        assert_eq!(err, Error::ExceedsAvailableCapacity { remaining: dec!(40) });
        assert_eq!(err.to_string(), "only 40.00 cubic feet available for this period");

        let fits = request(&listing, dec!(40), day(2024, 1, 5), day(2024, 1, 7));
        assert!(validate(&fits, Some(&listing), today(), &committed).is_ok());
    }

    #[test]
    fn fractional_total_is_never_overbooked() {
        let listing = listing(dec!(100.005), dec!(1));
        let committed = vec![booking(
            &listing,
            dec!(50),
            day(2024, 1, 1),
            day(2024, 1, 10),
            BookingStatus::Pending,
        )];

        let over = request(&listing, dec!(50.01), day(2024, 1, 3), day(2024, 1, 4));
        assert_eq!(
            validate(&over, Some(&listing), today(), &committed),
            Err(Error::ExceedsAvailableCapacity { remaining: dec!(50.00) })
        );

        // 50.006 rounds to 50.01 before the capacity check
        let rounded_over = request(&listing, dec!(50.006), day(2024, 1, 3), day(2024, 1, 4));
        assert!(validate(&rounded_over, Some(&listing), today(), &committed).is_err());

        let fits = request(&listing, dec!(50), day(2024, 1, 3), day(2024, 1, 4));
        assert!(validate(&fits, Some(&listing), today(), &committed).is_ok());
    }

    #[test]
    fn sub_cent_capacity_is_normalized_before_the_positivity_check() {
        let listing = listing(dec!(100), dec!(1));
        let req = request(&listing, dec!(0.005), day(2024, 1, 2), day(2024, 1, 3));
        let validated = validate(&req, Some(&listing), today(), &[]).unwrap();
        assert_eq!(validated.capacity_required.to_string(), "0.01");
    }
}
