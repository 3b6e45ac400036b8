//! Read-only access to listings owned by the external catalog.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};

use crate::domain::{Listing, ListingId, ListingStatus, UserId};

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("listing {id} has unknown status `{status}`")]
    UnknownStatus { id: ListingId, status: String },
    #[error("in-memory catalog lock poisoned")]
    Poisoned,
}

#[async_trait]
pub trait ListingCatalog: Send + Sync {
    async fn listing(&self, id: ListingId) -> Result<Option<Listing>, CatalogError>;

    async fn listings_owned_by(&self, owner_id: UserId) -> Result<Vec<Listing>, CatalogError>;

    /// The listing if it exists and accepts bookings.
    async fn active_listing(&self, id: ListingId) -> Result<Option<Listing>, CatalogError> {
        Ok(self.listing(id).await?.filter(Listing::is_active))
    }
}

#[derive(Default)]
pub struct InMemoryCatalog {
    listings: RwLock<HashMap<ListingId, Listing>>,
}

impl InMemoryCatalog {
    pub fn with_listings(listings: impl IntoIterator<Item = Listing>) -> Self {
        Self {
            listings: RwLock::new(listings.into_iter().map(|l| (l.id, l)).collect()),
        }
    }

    /// Parses a JSON array of listings in their camelCase wire form.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let listings: Vec<Listing> = serde_json::from_str(raw)?;
        Ok(Self::with_listings(listings))
    }
}

#[async_trait]
impl ListingCatalog for InMemoryCatalog {
    async fn listing(&self, id: ListingId) -> Result<Option<Listing>, CatalogError> {
        let listings = self.listings.read().map_err(|_| CatalogError::Poisoned)?;
        Ok(listings.get(&id).cloned())
    }

    async fn listings_owned_by(&self, owner_id: UserId) -> Result<Vec<Listing>, CatalogError> {
        let listings = self.listings.read().map_err(|_| CatalogError::Poisoned)?;
        Ok(listings
            .values()
            .filter(|listing| listing.owner_id == owner_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ListingRow {
    id: ListingId,
    owner_id: UserId,
    total_capacity: Decimal,
    price_per_unit_day: Decimal,
    status: String,
}

impl TryFrom<ListingRow> for Listing {
    type Error = CatalogError;

    fn try_from(row: ListingRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<ListingStatus>().map_err(|_| CatalogError::UnknownStatus {
            id: row.id,
            status: row.status.clone(),
        })?;
        Ok(Listing {
            id: row.id,
            owner_id: row.owner_id,
            total_capacity: row.total_capacity,
            price_per_unit_day: row.price_per_unit_day,
            status,
        })
    }
}

#[async_trait]
impl ListingCatalog for PgCatalog {
    async fn listing(&self, id: ListingId) -> Result<Option<Listing>, CatalogError> {
        sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT id, owner_id, total_capacity, price_per_unit_day, status
            FROM listings
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Listing::try_from)
        .transpose()
    }

    async fn listings_owned_by(&self, owner_id: UserId) -> Result<Vec<Listing>, CatalogError> {
        sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT id, owner_id, total_capacity, price_per_unit_day, status
            FROM listings
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Listing::try_from)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::domain::fixtures::listing;

    #[tokio::test]
    async fn active_listing_hides_inactive_and_deleted() {
        let active = listing(dec!(100), dec!(1));
        let mut inactive = listing(dec!(100), dec!(1));
        inactive.status = ListingStatus::Inactive;
        let catalog = InMemoryCatalog::with_listings([active.clone(), inactive.clone()]);

        assert_eq!(catalog.active_listing(active.id).await.unwrap(), Some(active));
        assert_eq!(catalog.active_listing(inactive.id).await.unwrap(), None);
        assert_eq!(catalog.listing(inactive.id).await.unwrap(), Some(inactive));
        assert_eq!(catalog.active_listing(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn seeds_from_json() {
        let raw = r#"[{
            "id": "5f0c6a8e-2b7d-4d3e-9a43-1f2b3c4d5e6f",
            "ownerId": "0a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d",
            "totalCapacity": "250.00",
            "pricePerUnitDay": 1.75,
            "status": "active"
        }]"#;
        let catalog = InMemoryCatalog::from_json(raw).unwrap();
        let id: ListingId = "5f0c6a8e-2b7d-4d3e-9a43-1f2b3c4d5e6f".parse().unwrap();

        let listing = catalog.active_listing(id).await.unwrap().unwrap();
        assert_eq!(listing.total_capacity, dec!(250));
        assert_eq!(listing.price_per_unit_day, dec!(1.75));

        assert!(InMemoryCatalog::from_json(r#"[{"id": "nope"}]"#).is_err());
    }

    #[tokio::test]
    async fn listings_by_owner() {
        let first = listing(dec!(10), dec!(1));
        let mut second = listing(dec!(20), dec!(1));
        second.owner_id = first.owner_id;
        let someone_else = listing(dec!(30), dec!(1));
        let catalog = InMemoryCatalog::with_listings([first.clone(), second, someone_else]);

        let owned = catalog.listings_owned_by(first.owner_id).await.unwrap();
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|l| l.owner_id == first.owner_id));
    }

    #[test]
    fn listing_rows_with_unknown_status_are_refused() {
        let id = Uuid::new_v4();
        let row = |status: &str| ListingRow {
            id,
            owner_id: Uuid::new_v4(),
            total_capacity: dec!(250.5),
            price_per_unit_day: dec!(0.75),
            status: status.into(),
        };

        let listing = Listing::try_from(row("inactive")).unwrap();
        assert_eq!(listing.status, ListingStatus::Inactive);
        assert_eq!(listing.total_capacity, dec!(250.5));

        match Listing::try_from(row("paused")) {
            Err(CatalogError::UnknownStatus { id: bad, status }) => {
                assert_eq!(bad, id);
                assert_eq!(status, "paused");
            }
            other => panic!("expected an unknown status, got {other:?}"),
        }
    }
}
