//! OCR engine abstraction and the tesseract subprocess implementation.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::OcrConfig;
use crate::types::OcrError;

/// Tesseract page segmentation mode used for one recognition pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecognitionMode {
    /// Uniform block of text (`--psm 6`).
    Block,
    /// Single text line (`--psm 7`).
    Line,
    /// Single word (`--psm 8`).
    Word,
}

impl RecognitionMode {
    /// All modes, in the order the solver runs them.
    pub const ALL: [RecognitionMode; 3] = [Self::Block, Self::Line, Self::Word];

    pub fn psm(self) -> u8 {
        match self {
            Self::Block => 6,
            Self::Line => 7,
            Self::Word => 8,
        }
    }
}

/// Something that turns image bytes into (possibly garbage) text.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &[u8], mode: RecognitionMode) -> Result<String, OcrError>;
}

/// Runs the `tesseract` binary once per call, feeding the image on stdin.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    config: OcrConfig,
}

impl TesseractEngine {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }

    fn command(&self, mode: RecognitionMode) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("stdin")
            .arg("stdout")
            .arg("--psm")
            .arg(mode.psm().to_string())
            .arg("--dpi")
            .arg(self.config.dpi.to_string())
            .arg("-l")
            .arg(&self.config.language)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, image: &[u8], mode: RecognitionMode) -> Result<String, OcrError> {
        let mut child = self.command(mode).spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(OcrError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(clean_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&self, image: &[u8], mode: RecognitionMode) -> Result<String, OcrError> {
        match tokio::time::timeout(self.config.timeout, self.run(image, mode)).await {
            Ok(result) => result,
            Err(_) => Err(OcrError::Timeout(self.config.timeout)),
        }
    }
}

/// Strip the line breaks and form feeds tesseract appends to its output.
pub fn clean_output(raw: &str) -> String {
    raw.chars().filter(|c| !matches!(c, '\n' | '\r' | '\x0c')).collect()
}
