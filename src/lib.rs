pub mod clock;
pub mod config;
pub mod decimal;
pub mod duration;
pub mod error;
pub mod models;
pub mod net;
pub mod period;
pub mod registry;
pub mod resolver;
pub mod source;
pub mod sources;

pub use error::{FetchError, SourceError, TickerError};
pub use models::{Anchor, Observation, ObservationSeries, ResolvedPrice, Target, TargetQuery};
pub use period::Period;
pub use resolver::Resolver;
pub use source::{PageSource, PriceSource, ResolvingSource, StreamSelector};
