pub mod host;
pub mod peer;
pub mod shared;
pub mod version;
