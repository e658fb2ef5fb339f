pub mod traits;

pub use traits::{FanRadio, RadioConfig, RadioError};
