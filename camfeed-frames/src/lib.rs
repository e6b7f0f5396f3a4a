pub mod capture_date;
pub mod frame_extractor;
pub mod sampler;
