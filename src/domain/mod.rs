pub mod listing;
pub mod payment;

pub use listing::ListingStatus;
pub use payment::PaymentStatus;
