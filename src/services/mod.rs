pub mod account;
pub mod principals;
pub mod reviews;
pub mod tours;

pub use account::{AccountError, AccountService, LogDelivery, ResetDelivery, Session};
pub use principals::StorePrincipals;
pub use reviews::RatingTrigger;
