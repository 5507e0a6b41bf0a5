pub mod compile;
pub mod exports;
pub mod serve;
pub mod version;
