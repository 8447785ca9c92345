use chrono::Utc;
use serde_json::{Map, Value};

use super::{timestamp, Populate, ResourceSchema, Rules, SchemaError};
use crate::database::CollectionSpec;

pub const BOOKINGS: &str = "bookings";

const FIELDS: &[&str] = &["tour", "user", "price", "createdAt", "paid"];

pub struct BookingSchema;

impl ResourceSchema for BookingSchema {
    fn collection(&self) -> CollectionSpec {
        CollectionSpec { name: BOOKINGS, unique_keys: &[] }
    }

    fn normalize(&self, data: Map<String, Value>) -> Result<Map<String, Value>, SchemaError> {
        let mut rules = Rules::new(data).known(FIELDS);
        rules
            .required("tour", "Booking must belong to a Tour!")
            .reference("tour")
            .required("user", "Booking must belong to a User!")
            .reference("user")
            .number("price")
            .required("price", "Booking must have a price.")
            .default("createdAt", timestamp(Utc::now()))
            .timestamp("createdAt")
            .default("paid", true)
            .boolean("paid");
        rules.finish()
    }

    fn populate(&self) -> Vec<Populate> {
        vec![
            Populate::Reference {
                path: "user",
                collection: super::user::USERS,
                hidden: super::user::HIDDEN,
            },
            Populate::Reference {
                path: "tour",
                collection: super::tour::TOURS,
                hidden: &["createdAt"],
            },
        ]
    }
}
