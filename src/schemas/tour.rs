use chrono::Utc;
use serde_json::{Map, Value};

use super::{timestamp, Populate, ResourceSchema, Rules, SchemaError};
use crate::database::CollectionSpec;
use crate::filter::FilterWhereInfo;

pub const TOURS: &str = "tours";

const FIELDS: &[&str] = &[
    "name",
    "slug",
    "duration",
    "maxGroupSize",
    "difficulty",
    "ratingsAverage",
    "ratingsQuantity",
    "price",
    "priceDiscount",
    "summary",
    "description",
    "imageCover",
    "images",
    "createdAt",
    "startDates",
    "secretTour",
    "startLocation",
    "locations",
    "guides",
];

pub const DIFFICULTIES: &[&str] = &["easy", "medium", "difficult"];

/// Reviews of a tour with their authors, attached on single-tour reads.
pub const TOUR_REVIEWS: Populate = Populate::Virtual {
    path: "reviews",
    collection: super::review::REVIEWS,
    foreign_field: "tour",
    hidden: &[],
    populate: &[Populate::Reference {
        path: "user",
        collection: super::user::USERS,
        hidden: super::user::HIDDEN,
    }],
};

pub struct TourSchema;

impl ResourceSchema for TourSchema {
    fn collection(&self) -> CollectionSpec {
        CollectionSpec { name: TOURS, unique_keys: &[&["name"]] }
    }

    fn normalize(&self, data: Map<String, Value>) -> Result<Map<String, Value>, SchemaError> {
        let mut rules = Rules::new(data).known(FIELDS);

        rules
            .string("name", true)
            .required("name", "A tour must have a name")
            .length(
                "name",
                10,
                40,
                "A tour name must have more or equal then 10 characters",
                "A tour name must have less or equal then 40 characters",
            )
            .number("duration")
            .required("duration", "A tour must have a duration")
            .number("maxGroupSize")
            .required("maxGroupSize", "A tour must have a group size")
            .string("difficulty", false)
            .required("difficulty", "A tour must have a difficulty")
            .one_of("difficulty", DIFFICULTIES, "Difficulty is either: easy, medium, difficult")
            .default("ratingsAverage", 4.5)
            .number("ratingsAverage")
            .range("ratingsAverage", 1.0, 5.0, "Rating must be above 1.0", "Rating must be below 5.0")
            .default("ratingsQuantity", 0)
            .number("ratingsQuantity")
            .number("price")
            .required("price", "A tour must have a price")
            .number("priceDiscount")
            .string("summary", true)
            .required("summary", "A tour must have a description")
            .string("description", true)
            .string("imageCover", false)
            .required("imageCover", "A tour must have a cover image")
            .string_list("images")
            .default("createdAt", timestamp(Utc::now()))
            .timestamp("createdAt")
            .timestamp_list("startDates")
            .default("secretTour", false)
            .boolean("secretTour")
            .point("startLocation")
            .point_list("locations")
            .reference_list("guides");

        if let Some(avg) = rules.get("ratingsAverage").and_then(Value::as_f64) {
            rules.set("ratingsAverage", round_rating(avg));
        }

        let price = rules.get("price").and_then(Value::as_f64);
        if let (Some(discount), Some(price)) = (rules.get("priceDiscount").and_then(Value::as_f64), price) {
            if discount >= price {
                rules.fail(
                    "priceDiscount",
                    format!("Discount price ({}) should be below regular price", discount),
                );
            }
        }

        if let Some(name) = rules.get("name").and_then(Value::as_str).map(slugify) {
            rules.set("slug", name);
        }

        rules.finish()
    }

    fn hidden_fields(&self) -> &'static [&'static str] {
        &["createdAt"]
    }

    fn default_scope(&self) -> Vec<FilterWhereInfo> {
        vec![FilterWhereInfo::ne("secretTour", true)]
    }

    fn populate(&self) -> Vec<Populate> {
        vec![Populate::Reference {
            path: "guides",
            collection: super::user::USERS,
            hidden: super::user::HIDDEN,
        }]
    }
}

/// Ratings keep one decimal: 4.666 → 4.7.
pub fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Lower-cased name with every run of other characters collapsed to `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}
