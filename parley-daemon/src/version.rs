//! Version information and build metadata display

use std::fmt;

use parley_audio::{RESPONSE_SAMPLE_RATE, TARGET_SAMPLE_RATE};
use parley_session::config::DEFAULT_MODEL;

pub struct VersionInfo {
    pub daemon_version: &'static str,
    /// Target triple (e.g., x86_64-unknown-linux-gnu)
    pub target: &'static str,
    pub profile: &'static str,
    pub git_commit: Option<&'static str>,
    pub build_timestamp: &'static str,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            daemon_version: env!("CARGO_PKG_VERSION"),
            target: env!("TARGET"),
            profile: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
            git_commit: option_env!("GIT_COMMIT_HASH"),
            build_timestamp: env!("BUILD_TIMESTAMP"),
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "parley-daemon {}", self.daemon_version)?;
        writeln!(f)?;

        writeln!(f, "Build Information:")?;
        writeln!(f, "  Target:       {}", self.target)?;
        writeln!(f, "  Profile:      {}", self.profile)?;
        writeln!(f, "  Build Date:   {}", self.build_timestamp)?;
        if let Some(commit) = self.git_commit {
            writeln!(f, "  Git Commit:   {}", commit)?;
        }

        writeln!(f)?;
        writeln!(f, "Audio:")?;
        writeln!(f, "  Capture:      PCM16 mono @ {} Hz", TARGET_SAMPLE_RATE)?;
        writeln!(f, "  Response:     PCM16 mono @ {} Hz", RESPONSE_SAMPLE_RATE)?;
        writeln!(f, "  Model:        {}", DEFAULT_MODEL)?;

        Ok(())
    }
}

/// Short version string (for --version)
pub fn version_short() -> String {
    format!("parley-daemon {}", env!("CARGO_PKG_VERSION"))
}

pub fn version_long() -> String {
    VersionInfo::current().to_string()
}
