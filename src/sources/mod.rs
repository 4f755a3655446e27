//! Provider adapters.

pub mod fss;
pub mod morningstar;
pub mod openexchange;
pub mod rba;

pub use fss::{FssLayout, FssSource};
pub use morningstar::MorningstarSource;
pub use openexchange::OpenExchangeSource;
pub use rba::RbaSource;
