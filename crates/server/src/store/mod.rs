pub mod compositions;
pub mod members;
pub mod seed;

pub use compositions::{CompositionAccess, CompositionStore};
pub use members::MemberDirectory;
