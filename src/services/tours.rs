use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::database::resource::populate;
use crate::database::{DatabaseError, Document, ResourceHandler};
use crate::filter::{Accumulator, Aggregation, FilterOp, FilterOrderInfo, FilterWhereInfo, GroupKey, QueryParams, QuerySpec};
use crate::schemas::tour::TOURS;
use crate::schemas::{ResourceSchema, TourSchema};

pub const EARTH_RADIUS_MI: f64 = 3963.2;
pub const EARTH_RADIUS_KM: f64 = 6378.1;
const METRES_TO_MILES: f64 = 0.000621371;
const METRES_TO_KM: f64 = 0.001;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("Please provide latitude and longitude in the format lat,lng")]
    InvalidLatLng,

    #[error("Invalid distance: {0}")]
    InvalidDistance(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    /// `mi` selects miles; anything else is kilometres.
    pub fn parse(s: &str) -> Self {
        if s == "mi" {
            DistanceUnit::Miles
        } else {
            DistanceUnit::Kilometers
        }
    }

    pub fn earth_radius(&self) -> f64 {
        match self {
            DistanceUnit::Miles => EARTH_RADIUS_MI,
            DistanceUnit::Kilometers => EARTH_RADIUS_KM,
        }
    }

    pub fn per_metre(&self) -> f64 {
        match self {
            DistanceUnit::Miles => METRES_TO_MILES,
            DistanceUnit::Kilometers => METRES_TO_KM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn parse(raw: &str) -> Result<Self, GeoError> {
        let (lat, lng) = raw.split_once(',').ok_or(GeoError::InvalidLatLng)?;
        let lat: f64 = lat.trim().parse().map_err(|_| GeoError::InvalidLatLng)?;
        let lng: f64 = lng.trim().parse().map_err(|_| GeoError::InvalidLatLng)?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(GeoError::InvalidLatLng);
        }
        Ok(Self { lat, lng })
    }

    /// Reads a GeoJSON point (`[lng, lat]`).
    pub fn from_point(point: &Value) -> Option<Self> {
        let coordinates = point.get("coordinates")?.as_array()?;
        Some(Self {
            lng: coordinates.first()?.as_f64()?,
            lat: coordinates.get(1)?.as_f64()?,
        })
    }

    /// Great-circle angle to `other`, in radians.
    pub fn central_angle(&self, other: &LatLng) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TourDistance {
    pub id: Uuid,
    pub name: Option<String>,
    pub distance: f64,
}

/// Best-rated, cheapest first; five of them.
pub fn top_cheap_params(params: &QueryParams) -> QueryParams {
    params
        .clone()
        .with("limit", "5")
        .with("sort", "-ratingsAverage,price")
        .with("fields", "name,price,ratingsAverage,summary,difficulty")
}

/// Rating and price figures per difficulty for well-rated tours.
pub async fn tour_stats(tours: &ResourceHandler<TourSchema>) -> Result<Vec<Value>, DatabaseError> {
    let mut conditions = tours.schema().default_scope();
    conditions.push(FilterWhereInfo::new("ratingsAverage", FilterOp::Gte, 4.5));

    let aggregation = Aggregation::group(GroupKey::Upper("difficulty".into()), "difficulty")
        .matching(conditions)
        .accumulate("numTours", Accumulator::Count)
        .accumulate("numRatings", Accumulator::Sum("ratingsQuantity".into()))
        .accumulate("avgRating", Accumulator::Avg("ratingsAverage".into()))
        .accumulate("avgPrice", Accumulator::Avg("price".into()))
        .accumulate("minPrice", Accumulator::Min("price".into()))
        .accumulate("maxPrice", Accumulator::Max("price".into()))
        .sort_by(FilterOrderInfo::asc("avgPrice"));
    tours.store().aggregate(TOURS, &aggregation).await
}

/// Tour starts per month of `year`, busiest month first.
pub async fn monthly_plan(tours: &ResourceHandler<TourSchema>, year: i32) -> Result<Vec<Value>, DatabaseError> {
    let mut conditions = tours.schema().default_scope();
    conditions.push(FilterWhereInfo::new("startDates", FilterOp::Gte, format!("{:04}-01-01T00:00:00.000Z", year)));
    conditions.push(FilterWhereInfo::new("startDates", FilterOp::Lt, format!("{:04}-01-01T00:00:00.000Z", year + 1)));

    let aggregation = Aggregation::group(GroupKey::Month("startDates".into()), "month")
        .matching(conditions)
        .unwind("startDates")
        .accumulate("numTourStarts", Accumulator::Count)
        .accumulate("tours", Accumulator::Push("name".into()))
        .sort_by(FilterOrderInfo::desc("numTourStarts"))
        .limit(12);
    tours.store().aggregate(TOURS, &aggregation).await
}

/// Visible tours with a start location, as stored.
async fn located_tours(tours: &ResourceHandler<TourSchema>) -> Result<Vec<Document>, DatabaseError> {
    let spec = QuerySpec::matching(tours.schema().default_scope());
    let docs = tours.store().find(TOURS, &spec).await?;
    Ok(docs.into_iter().filter(|d| start_of(d).is_some()).collect())
}

fn start_of(doc: &Document) -> Option<LatLng> {
    doc.data.get("startLocation").and_then(LatLng::from_point)
}

/// Tours starting within `distance` (in `unit`) of `center`.
pub async fn tours_within(
    tours: &ResourceHandler<TourSchema>,
    distance: f64,
    center: LatLng,
    unit: DistanceUnit,
) -> Result<Vec<Document>, DatabaseError> {
    let radius = distance / unit.earth_radius();
    let mut within: Vec<Document> = located_tours(tours)
        .await?
        .into_iter()
        .filter(|doc| start_of(doc).is_some_and(|start| center.central_angle(&start) <= radius))
        .collect();

    populate(tours.store().as_ref(), &mut within, &tours.schema().populate()).await?;
    Ok(within.into_iter().map(|d| tours.present(d)).collect())
}

/// Distance from `origin` to every located tour, nearest first.
pub async fn distances(
    tours: &ResourceHandler<TourSchema>,
    origin: LatLng,
    unit: DistanceUnit,
) -> Result<Vec<TourDistance>, DatabaseError> {
    let metres_per_radian = EARTH_RADIUS_KM * 1000.0;
    let mut out: Vec<TourDistance> = located_tours(tours)
        .await?
        .into_iter()
        .filter_map(|doc| {
            let start = start_of(&doc)?;
            Some(TourDistance {
                id: doc.id,
                name: doc.get_str("name").map(str::to_string),
                distance: origin.central_angle(&start) * metres_per_radian * unit.per_metre(),
            })
        })
        .collect();
    out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    Ok(out)
}

pub fn parse_distance(raw: &str) -> Result<f64, GeoError> {
    raw.parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| GeoError::InvalidDistance(raw.to_string()))
}
