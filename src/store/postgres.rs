use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use super::{BookingStore, ListingSession, StoreError};
use crate::domain::{Booking, BookingId, BookingStatus, ListingId, PaymentStatus, UserId};

const BOOKING_COLUMNS: &str = "id, listing_id, renter_id, capacity_required, start_date, end_date, \
     total_price, status, payment_status, payment_id, refund_id, notes, rejection_reason, created_at, \
     updated_at";

fn select_bookings(filter: &str) -> String {
    format!("SELECT {BOOKING_COLUMNS} FROM bookings {filter}")
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(pool: PgPool) -> Result<Self, sqlx::Error> {
        // Owned by the catalog; created here so a fresh database boots.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                id UUID PRIMARY KEY,
                owner_id UUID NOT NULL,
                total_capacity NUMERIC(10, 2) NOT NULL CHECK (total_capacity > 0),
                price_per_unit_day NUMERIC(10, 2) NOT NULL CHECK (price_per_unit_day >= 0),
                status TEXT NOT NULL DEFAULT 'active'
            )"#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bookings (
                id UUID PRIMARY KEY,
                listing_id UUID NOT NULL,
                renter_id UUID NOT NULL,
                capacity_required NUMERIC(10, 2) NOT NULL CHECK (capacity_required > 0),
                start_date DATE NOT NULL,
                end_date DATE NOT NULL CHECK (end_date > start_date),
                total_price NUMERIC NOT NULL CHECK (total_price >= 0),
                status TEXT NOT NULL,
                payment_status TEXT NOT NULL,
                payment_id TEXT NULL,
                refund_id TEXT NULL,
                notes TEXT NULL,
                rejection_reason TEXT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )"#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS bookings_listing_range ON bookings (listing_id, start_date, end_date)",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS bookings_renter ON bookings (renter_id)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }
}

#[derive(FromRow)]
struct BookingRow {
    id: BookingId,
    listing_id: ListingId,
    renter_id: UserId,
    capacity_required: Decimal,
    start_date: NaiveDate,
    end_date: NaiveDate,
    total_price: Decimal,
    status: String,
    payment_status: String,
    payment_id: Option<String>,
    refund_id: Option<String>,
    notes: Option<String>,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt { id: row.id, reason };
        let status = row
            .status
            .parse::<BookingStatus>()
            .map_err(|e| corrupt(format!("status: {e}")))?;
        let payment_status = row
            .payment_status
            .parse::<PaymentStatus>()
            .map_err(|e| corrupt(format!("payment status: {e}")))?;
        Ok(Booking {
            id: row.id,
            listing_id: row.listing_id,
            renter_id: row.renter_id,
            capacity_required: row.capacity_required,
            start_date: row.start_date,
            end_date: row.end_date,
            total_price: row.total_price,
            status,
            payment_status,
            payment_id: row.payment_id,
            refund_id: row.refund_id,
            notes: row.notes,
            rejection_reason: row.rejection_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_bookings(rows: Vec<BookingRow>) -> Result<Vec<Booking>, StoreError> {
    rows.into_iter().map(Booking::try_from).collect()
}

#[async_trait]
impl BookingStore for PgStore {
    async fn begin(&self, listing_id: ListingId) -> Result<Box<dyn ListingSession>, StoreError> {
        let mut tx = self.pool.begin().await?;
        // Held until the transaction ends, on commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(listing_id.to_string())
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgSession { listing_id, tx }))
    }

    async fn find(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let sql = select_bookings("WHERE id = $1");
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn for_renter(&self, renter_id: UserId) -> Result<Vec<Booking>, StoreError> {
        let sql = select_bookings("WHERE renter_id = $1");
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(renter_id)
            .fetch_all(&self.pool)
            .await?;
        into_bookings(rows)
    }

    async fn for_listings(&self, listing_ids: &[ListingId]) -> Result<Vec<Booking>, StoreError> {
        let sql = select_bookings("WHERE listing_id = ANY($1)");
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(listing_ids)
            .fetch_all(&self.pool)
            .await?;
        into_bookings(rows)
    }
}

struct PgSession {
    listing_id: ListingId,
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ListingSession for PgSession {
    fn listing_id(&self) -> ListingId {
        self.listing_id
    }

    async fn booking(&mut self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let sql = select_bookings("WHERE id = $1 AND listing_id = $2");
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .bind(self.listing_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn active_bookings(&mut self) -> Result<Vec<Booking>, StoreError> {
        let sql = select_bookings("WHERE listing_id = $1 AND status IN ('pending', 'approved')");
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(self.listing_id)
            .fetch_all(&mut *self.tx)
            .await?;
        into_bookings(rows)
    }

    async fn insert(&mut self, booking: &Booking) -> Result<(), StoreError> {
        if booking.listing_id != self.listing_id {
            return Err(StoreError::OutsideSession(booking.id));
        }
        let sql = format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        );
        sqlx::query(&sql)
            .bind(booking.id)
            .bind(booking.listing_id)
            .bind(booking.renter_id)
            .bind(booking.capacity_required)
            .bind(booking.start_date)
            .bind(booking.end_date)
            .bind(booking.total_price)
            .bind(booking.status.as_str())
            .bind(booking.payment_status.as_str())
            .bind(&booking.payment_id)
            .bind(&booking.refund_id)
            .bind(&booking.notes)
            .bind(&booking.rejection_reason)
            .bind(booking.created_at)
            .bind(booking.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update(&mut self, booking: &Booking) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $3, payment_status = $4, payment_id = $5, refund_id = $6,
                rejection_reason = $7, updated_at = $8
            WHERE id = $1 AND listing_id = $2
            "#,
        )
        .bind(booking.id)
        .bind(self.listing_id)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(&booking.payment_id)
        .bind(&booking.refund_id)
        .bind(&booking.rejection_reason)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() < 1 {
            return Err(StoreError::Missing(booking.id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
