pub mod artifact;
pub mod delivery;

pub use artifact::*;
pub use delivery::*;
