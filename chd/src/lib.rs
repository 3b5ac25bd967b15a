#![doc = include_str!("../README.md")]

pub mod utils;
pub mod stats;

mod hash;
pub use hash::PhfKey;

mod displacements;
pub use displacements::Displacements;

mod function;
pub use function::{BuildConf, BuildError, Function};

pub use utils::uniq;

pub use dyn_size_of::GetSize;
