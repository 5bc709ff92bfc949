use serde::{Deserialize, Serialize};

/// Audio files played on phase transitions. Missing entries play nothing.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ChimesConfig {
    #[serde(default)]
    pub break_start: Option<String>,
    #[serde(default)]
    pub work_resume: Option<String>,
    #[serde(default)]
    pub complete: Option<String>,
}
