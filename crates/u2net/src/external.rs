//! The `rembg` command-line tool as an alternative matting backend.

use std::{
    path::Path,
    process::{Command, Stdio},
};

use burn::prelude::*;
use image::RgbaImage;

use crate::error::{RemovalError, RemovalResult};

/// Invocation settings for the external matting tool.
#[derive(Config, Debug)]
pub struct ExternalMattingConfig {
    /// Executable name or path.
    #[config(default = "String::from(\"rembg\")")]
    pub program: String,
    /// Alpha-matting foreground threshold.
    #[config(default = 270)]
    pub foreground_threshold: u32,
    /// Alpha-matting background threshold.
    #[config(default = 10)]
    pub background_threshold: u32,
    /// Alpha-matting erosion size.
    #[config(default = 10)]
    pub erode_size: u32,
    #[config(default = true)]
    pub post_process_mask: bool,
}

/// Runs `rembg i` on a file and decodes its PNG output.
#[derive(Debug, Clone)]
pub struct ExternalMatting {
    config: ExternalMattingConfig,
}

impl ExternalMatting {
    pub const fn new(config: ExternalMattingConfig) -> Self {
        Self { config }
    }

    pub fn program(&self) -> &str {
        &self.config.program
    }

    /// Whether the tool can be started and answers `--help` successfully.
    pub fn is_available(&self) -> bool {
        let available = Command::new(&self.config.program)
            .arg("--help")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success());

        tracing::debug!(program = %self.config.program, available, "probed external matting tool");
        available
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.config.program);
        command
            .arg("i")
            .arg("-a")
            .args(["-af", &self.config.foreground_threshold.to_string()])
            .args(["-ab", &self.config.background_threshold.to_string()])
            .args(["-ae", &self.config.erode_size.to_string()]);
        if self.config.post_process_mask {
            command.arg("-ppm");
        }
        command.arg(input).arg(output);
        command
    }

    /// Matte `input` and return the RGBA result.
    ///
    /// The tool writes into a scratch directory that is removed on return.
    pub fn remove(&self, input: &Path) -> RemovalResult<RgbaImage> {
        let scratch = tempfile::tempdir().map_err(|e| RemovalError::ExternalMatting {
            reason: format!("cannot create scratch directory: {e}"),
        })?;
        let output = scratch.path().join("matte.png");

        tracing::info!(program = %self.config.program, input = %input.display(), "running external matting");
        let result = self
            .command(input, &output)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RemovalError::ExternalMatting {
                reason: format!("cannot start '{}': {e}", self.config.program),
            })?;

        if !result.status.success() {
            return Err(RemovalError::ExternalMatting {
                reason: format!(
                    "'{}' exited with {}: {}",
                    self.config.program,
                    result.status,
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            });
        }

        let matte = image::open(&output).map_err(|e| RemovalError::ExternalMatting {
            reason: format!("cannot decode output of '{}': {e}", self.config.program),
        })?;

        Ok(matte.to_rgba8())
    }
}
