pub mod avalon;
pub mod traits;
