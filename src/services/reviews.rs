use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::database::{DatabaseError, Document, DocumentStore, WriteTrigger};
use crate::filter::{Accumulator, Aggregation, FilterWhereInfo, GroupKey};
use crate::schemas::booking::BOOKINGS;
use crate::schemas::review::REVIEWS;
use crate::schemas::tour::{round_rating, TOURS};

pub const DEFAULT_RATING: f64 = 4.5;

/// Keeps `ratingsQuantity` and `ratingsAverage` of a tour in line with its
/// reviews. When a review moves between tours both are recomputed.
pub struct RatingTrigger;

#[async_trait]
impl WriteTrigger for RatingTrigger {
    async fn after_write(
        &self,
        store: &dyn DocumentStore,
        before: Option<&Document>,
        after: Option<&Document>,
    ) -> Result<(), DatabaseError> {
        let mut tours: Vec<&str> = before.iter().chain(after.iter()).filter_map(|d| d.get_str("tour")).collect();
        tours.dedup();
        for tour in tours {
            recalculate_ratings(store, tour).await?;
        }
        Ok(())
    }
}

pub async fn recalculate_ratings(store: &dyn DocumentStore, tour: &str) -> Result<(), DatabaseError> {
    let Ok(tour_id) = Uuid::parse_str(tour) else {
        return Ok(());
    };

    let aggregation = Aggregation::group(GroupKey::Field("tour".into()), "tour")
        .matching(vec![FilterWhereInfo::eq("tour", tour)])
        .accumulate("nRating", Accumulator::Count)
        .accumulate("avgRating", Accumulator::Avg("rating".into()));
    let stats = store.aggregate(REVIEWS, &aggregation).await?;

    let (quantity, average) = match stats.first() {
        Some(row) => (
            row.get("nRating").and_then(Value::as_i64).unwrap_or(0),
            row.get("avgRating").and_then(Value::as_f64).map(round_rating).unwrap_or(DEFAULT_RATING),
        ),
        None => (0, DEFAULT_RATING),
    };

    let updated = store
        .modify(TOURS, tour_id, &|mut data| {
            data.insert("ratingsQuantity".into(), Value::from(quantity));
            data.insert("ratingsAverage".into(), Value::from(average));
            data
        })
        .await?;
    if updated.is_none() {
        tracing::debug!("Tour {} is gone; skipping rating update", tour);
        return Ok(());
    }
    tracing::debug!("Tour {} now has {} ratings averaging {}", tour, quantity, average);
    Ok(())
}

/// Only users with a booking for the tour may review it.
pub async fn has_booked(store: &dyn DocumentStore, tour: &str, user: &str) -> Result<bool, DatabaseError> {
    let booking = store
        .find_one(BOOKINGS, vec![FilterWhereInfo::eq("tour", tour), FilterWhereInfo::eq("user", user)])
        .await?;
    Ok(booking.is_some())
}
