//! Read/confirm access to bookings owned by the booking service.

use crate::database::error::DatabaseError;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// What settlement needs to know about a booking
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct BookingSummary {
    pub booking_id: Uuid,
    pub passenger_id: Uuid,
    pub driver_id: Uuid,
    pub total_fare: BigDecimal,
    /// Human-readable route, e.g. "Pune → Mumbai"
    pub route: String,
    pub confirmed: bool,
}

#[async_trait]
pub trait BookingDirectory: Send + Sync {
    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<BookingSummary>, DatabaseError>;

    /// Mark the booking confirmed once its payment succeeded. Idempotent.
    async fn confirm_after_payment(&self, booking_id: Uuid)
        -> Result<BookingSummary, DatabaseError>;
}

/// Reads the booking service's `bookings`/`rides` tables
pub struct PgBookingDirectory {
    pool: PgPool,
}

impl PgBookingDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingDirectory for PgBookingDirectory {
    async fn find_booking(&self, booking_id: Uuid) -> Result<Option<BookingSummary>, DatabaseError> {
        sqlx::query_as::<_, BookingSummary>(
            "SELECT b.id AS booking_id, b.passenger_id, r.driver_id, b.total_fare, \
                    r.source || ' → ' || r.destination AS route, \
                    b.status = 'CONFIRMED' AS confirmed \
             FROM bookings b JOIN rides r ON r.id = b.ride_id \
             WHERE b.id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn confirm_after_payment(
        &self,
        booking_id: Uuid,
    ) -> Result<BookingSummary, DatabaseError> {
        sqlx::query("UPDATE bookings SET status = 'CONFIRMED', updated_at = NOW() WHERE id = $1")
            .bind(booking_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        self.find_booking(booking_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("booking", booking_id))
    }
}
