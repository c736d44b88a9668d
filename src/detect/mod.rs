mod backend;
mod backends;
mod result;

pub use backend::DetectorBackend;
pub use backends::ReplayBackend;
pub use result::{Detection, DetectionSet, RawDetection};
