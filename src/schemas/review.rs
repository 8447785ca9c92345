use chrono::Utc;
use serde_json::{Map, Value};

use super::{timestamp, Populate, ResourceSchema, Rules, SchemaError};
use crate::database::CollectionSpec;

pub const REVIEWS: &str = "reviews";

const FIELDS: &[&str] = &["review", "rating", "createdAt", "tour", "user"];

pub struct ReviewSchema;

impl ResourceSchema for ReviewSchema {
    fn collection(&self) -> CollectionSpec {
        CollectionSpec { name: REVIEWS, unique_keys: &[&["tour", "user"]] }
    }

    fn normalize(&self, data: Map<String, Value>) -> Result<Map<String, Value>, SchemaError> {
        let mut rules = Rules::new(data).known(FIELDS);
        rules
            .string("review", true)
            .required("review", "Review cannot be empty!")
            .number("rating")
            .range("rating", 1.0, 5.0, "Rating must be above 1.0", "Rating must be below 5.0")
            .default("createdAt", timestamp(Utc::now()))
            .timestamp("createdAt")
            .required("tour", "Review must belong to a tour!")
            .reference("tour")
            .required("user", "Review must belong to a user!")
            .reference("user");
        rules.finish()
    }

    fn populate(&self) -> Vec<Populate> {
        vec![Populate::Reference {
            path: "user",
            collection: super::user::USERS,
            hidden: super::user::HIDDEN,
        }]
    }
}
