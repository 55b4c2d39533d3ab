pub mod http;
pub mod stub;

pub use http::{HttpDetector, HttpDetectorConfig};
pub use stub::{NoneDetector, StubDetector};
