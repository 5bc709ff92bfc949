//! Upload format detection by file extension.

/// Containers accepted by the transcode pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Ogg,
    Mp4,
    Aac,
    Wav,
    Flac,
    Unknown,
}

impl AudioFormat {
    fn from_ext(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "mp3" => Self::Mp3,
            "ogg" | "oga" => Self::Ogg,
            "mp4" | "m4a" => Self::Mp4,
            "aac" => Self::Aac,
            "wav" | "wave" => Self::Wav,
            "flac" => Self::Flac,
            _ => Self::Unknown,
        }
    }

    /// Detects the format from an uploaded file name; only the extension is
    /// considered, never the content.
    pub fn from_file_name(name: &str) -> Self {
        std::path::Path::new(name)
            .extension()
            .and_then(|s| s.to_str())
            .map(Self::from_ext)
            .unwrap_or(Self::Unknown)
    }

    /// Extension handed to symphonia as a format hint; `None` for
    /// formats the pipeline does not accept.
    pub fn hint_ext(&self) -> Option<&'static str> {
        match self {
            Self::Mp3 => Some("mp3"),
            Self::Ogg => Some("ogg"),
            Self::Mp4 => Some("m4a"),
            Self::Aac => Some("aac"),
            Self::Wav => Some("wav"),
            Self::Flac => Some("flac"),
            Self::Unknown => None,
        }
    }
}
