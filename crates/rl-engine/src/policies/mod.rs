//! Concrete exploration policies and policy wrappers.

pub mod adf;
pub mod epsilon_greedy;
pub mod explore;
pub mod linear;
pub mod safe;
pub mod softmax;

pub use adf::AdfUcbPolicy;
pub use epsilon_greedy::EpsilonGreedy;
pub use explore::Explore;
pub use linear::{LinUcbPolicy, LinearArms, ThompsonPolicy};
pub use safe::{SafePolicy, SafeReport};
pub use softmax::SoftmaxPolicy;
