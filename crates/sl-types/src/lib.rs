pub mod config;
pub mod dataset;
pub mod errors;
pub mod params;
pub mod trial;

pub use config::*;
pub use dataset::*;
pub use errors::*;
pub use params::*;
pub use trial::*;
