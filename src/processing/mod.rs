pub mod audio_mixer;
pub mod audio_recorder;
pub mod encoding;
pub mod webm;
