pub mod lowpass;
