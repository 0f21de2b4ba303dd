pub mod actor;
pub mod bundle;
pub mod quote;
pub mod request;
