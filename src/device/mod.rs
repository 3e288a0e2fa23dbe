pub mod audio;

pub use audio::*;
