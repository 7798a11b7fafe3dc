pub mod buffer;
pub mod capture;
pub mod decode;
pub mod pitch;
