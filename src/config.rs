//! Runtime configuration.
//!
//! Defaults are built in [`Config::new`]. An optional TOML file overrides
//! them, and the command line overrides the file:
//!
//! ```toml
//! output_dir = "music"
//!
//! [encoder]
//! program = "/usr/bin/ffmpeg"
//! args = ["-y", "-i", "{input}", "-q:a", "2", "-map", "a", "{output}"]
//! ```

use std::{fs, path::Path, path::PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Configuration files larger than this are rejected before parsing.
const MAX_CONFIG_FILE_SIZE: u64 = 64 * 1024;

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub app_lang: String,

    pub user_agent: String,

    /// Directory receiving both the intermediate and the final files.
    pub output_dir: PathBuf,

    pub encoder: EncoderConfig,
}

/// External encoder invocation.
///
/// `{input}` and `{output}` in `args` are replaced by the intermediate and
/// final file paths.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
pub struct EncoderConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EncoderConfig {
    pub const INPUT_PLACEHOLDER: &'static str = "{input}";
    pub const OUTPUT_PLACEHOLDER: &'static str = "{output}";
}

impl Default for EncoderConfig {
    /// `ffmpeg` producing a VBR MP3 from the first audio stream.
    ///
    /// `-y` keeps `ffmpeg` from prompting on stdin when the final file
    /// already exists.
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            args: [
                "-y",
                "-i",
                Self::INPUT_PLACEHOLDER,
                "-q:a",
                "0",
                "-map",
                "a",
                Self::OUTPUT_PLACEHOLDER,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// On-disk representation. Every field is optional.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    output_dir: Option<PathBuf>,
    user_agent: Option<String>,
    encoder: Option<EncoderConfig>,
}

impl Config {
    /// Default output directory, relative to the working directory.
    pub const DEFAULT_OUTPUT_DIR: &'static str = "output";

    #[must_use]
    pub fn new() -> Self {
        let app_name = env!("CARGO_PKG_NAME").to_owned();
        let app_version = env!("CARGO_PKG_VERSION").to_owned();
        let app_lang = "en".to_owned();

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        let os_name = std::env::consts::OS;
        let os_version = sysinfo::System::os_version()
            .filter(|version| !version.is_empty() && !version.contains(illegal_chars))
            .unwrap_or_else(|| String::from("0"));

        let user_agent =
            format!("{app_name}/{app_version} (Rust; {os_name}/{os_version}; {app_lang})");
        trace!("user agent: {user_agent}");

        Self {
            app_name,
            app_version,
            app_lang,
            user_agent,
            output_dir: PathBuf::from(Self::DEFAULT_OUTPUT_DIR),
            encoder: EncoderConfig::default(),
        }
    }

    /// Loads the defaults overridden by the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is larger than 64 KiB, or
    /// is not valid TOML for this configuration.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: the file should be small.
        let file_size = fs::metadata(path)?.len();
        if file_size > MAX_CONFIG_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        let mut config = Self::new();
        config.apply(toml::from_str(&contents)?)?;
        Ok(config)
    }

    fn apply(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(output_dir) = file.output_dir {
            self.output_dir = output_dir;
        }

        if let Some(user_agent) = file.user_agent {
            if user_agent.trim().is_empty() {
                return Err(Error::invalid_argument("user agent is empty"));
            }
            self.user_agent = user_agent;
        }

        if let Some(encoder) = file.encoder {
            if encoder.program.as_os_str().is_empty() {
                return Err(Error::invalid_argument("encoder program is empty"));
            }
            self.encoder = encoder;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new();
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.encoder.program, PathBuf::from("ffmpeg"));
        assert!(config.user_agent.starts_with("vkaudio/"));
        assert!(config
            .encoder
            .args
            .iter()
            .any(|arg| arg == EncoderConfig::INPUT_PLACEHOLDER));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut config = Config::new();
        let file: ConfigFile = toml::from_str(
            r#"
            output_dir = "/tmp/music"

            [encoder]
            program = "lame"
            args = ["{input}", "{output}"]
            "#,
        )
        .unwrap();
        config.apply(file).unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/tmp/music"));
        assert_eq!(config.encoder.program, PathBuf::from("lame"));
        assert_eq!(config.encoder.args, vec!["{input}", "{output}"]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<ConfigFile>("outptu_dir = \"x\"").is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vkaudio.toml");
        fs::write(&path, "output_dir = \"tracks\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("tracks"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = Config::from_file("/nonexistent/vkaudio.toml").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }
}
