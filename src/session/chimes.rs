use tracing::info;

use crate::{
    audio::{AudioFrameStream, transcode_file},
    common::errors::TranscodeError,
    configs::ChimesConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChimeKind {
    BreakStart,
    WorkResume,
    Complete,
}

/// Pre-transcoded one-shot sounds for phase transitions.
#[derive(Debug, Clone, Default)]
pub struct Chimes {
    pub break_start: Option<AudioFrameStream>,
    pub work_resume: Option<AudioFrameStream>,
    pub complete: Option<AudioFrameStream>,
}

impl Chimes {
    /// Transcodes every configured chime. A configured file that cannot be
    /// converted is an error; an unset one plays nothing.
    pub fn load(config: &ChimesConfig) -> Result<Self, TranscodeError> {
        let load_one = |path: &Option<String>| -> Result<Option<AudioFrameStream>, TranscodeError> {
            let Some(path) = path else {
                return Ok(None);
            };
            let stream = transcode_file(path)?;
            info!("Loaded chime {} ({} frames)", path, stream.frame_count());
            Ok(Some(stream))
        };

        Ok(Self {
            break_start: load_one(&config.break_start)?,
            work_resume: load_one(&config.work_resume)?,
            complete: load_one(&config.complete)?,
        })
    }

    pub fn get(&self, kind: ChimeKind) -> Option<&AudioFrameStream> {
        match kind {
            ChimeKind::BreakStart => self.break_start.as_ref(),
            ChimeKind::WorkResume => self.work_resume.as_ref(),
            ChimeKind::Complete => self.complete.as_ref(),
        }
    }
}
