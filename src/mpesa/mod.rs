pub mod client;

pub use client::{DarajaClient, DarajaCredentials, DarajaError, StkPushResponse, StkQueryResponse};
