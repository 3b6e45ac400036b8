use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::domain::Booking;

#[derive(thiserror::Error, Debug)]
#[error("payment gateway failure: {0}")]
pub struct PaymentError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub payment_id: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Marker stored on a new booking until the host approves it.
    fn pending_marker(&self) -> String;
    async fn charge(&self, booking: &Booking) -> Result<PaymentReceipt, PaymentError>;
    async fn refund(&self, booking: &Booking) -> Result<PaymentReceipt, PaymentError>;
}

/// Settles nothing. Ids are sequential so runs are reproducible.
#[derive(Default)]
pub struct MockPayments {
    sequence: AtomicU64,
}

impl MockPayments {
    fn next(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl PaymentGateway for MockPayments {
    fn pending_marker(&self) -> String {
        format!("MOCK_PAY_PENDING_{}", self.next())
    }

    async fn charge(&self, booking: &Booking) -> Result<PaymentReceipt, PaymentError> {
        let payment_id = format!("MOCK_PAY_{}", self.next());
        tracing::debug!(booking_id = %booking.id, amount = %booking.total_price, %payment_id, "mock charge");
        Ok(PaymentReceipt { payment_id })
    }

    async fn refund(&self, booking: &Booking) -> Result<PaymentReceipt, PaymentError> {
        let payment_id = format!("MOCK_REFUND_{}", self.next());
        tracing::debug!(booking_id = %booking.id, amount = %booking.total_price, %payment_id, "mock refund");
        Ok(PaymentReceipt { payment_id })
    }
}
