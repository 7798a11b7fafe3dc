pub mod clock;
pub mod results;
pub mod scoring;
pub mod song;
pub mod ultrastar;
