// Route handlers, one module per resource. Plain CRUD goes through the
// schema-generic handlers in `resource`.
pub mod resource;
pub mod reviews;
pub mod tours;
pub mod users;
pub mod utils;
