mod backend;
mod backends;

pub use backend::LandmarkExtractor;
pub use backends::ReplayExtractor;
