pub mod biquad;
pub mod db;
pub mod fft;
pub mod fft_runtime;
pub mod frame;
pub mod oversampling;
pub mod weighting;
pub mod window;
