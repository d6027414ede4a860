pub mod directory;
pub mod field;

pub use directory::SchemaDirectory;
pub use field::*;
