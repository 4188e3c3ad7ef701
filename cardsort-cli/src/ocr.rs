//! Title reading through an external OCR command.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use cardsort_core::NameReader;
use image::RgbImage;
use tracing::{debug, warn};

/// Placeholder replaced by the region image path in the command line.
pub const PATH_PLACEHOLDER: &str = "{}";

static NEXT_SCRATCH: AtomicU64 = AtomicU64::new(0);

/// Runs a command such as `tesseract {} stdout --psm 7` on each title region
/// and takes its trimmed stdout as the reading.
#[derive(Debug)]
pub struct CommandNameReader {
    program: String,
    args: Vec<String>,
    scratch: PathBuf,
    reads: u64,
}

impl CommandNameReader {
    pub fn new(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let Some(program) = parts.next() else {
            bail!("OCR command is empty");
        };
        let mut args: Vec<String> = parts.collect();
        if !args.iter().any(|arg| arg.contains(PATH_PLACEHOLDER)) {
            args.push(PATH_PLACEHOLDER.to_string());
        }

        let scratch = std::env::temp_dir().join(format!(
            "cardsort-ocr-{}-{}",
            std::process::id(),
            NEXT_SCRATCH.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&scratch)
            .with_context(|| format!("Failed to create OCR scratch dir: {}", scratch.display()))?;

        Ok(Self {
            program,
            args,
            scratch,
            reads: 0,
        })
    }

    /// Arguments with the placeholder substituted.
    pub fn args_for(&self, image: &Path) -> Vec<String> {
        let path = image.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(PATH_PLACEHOLDER, &path))
            .collect()
    }

    fn run(&mut self, region: &RgbImage) -> Result<Option<String>> {
        self.reads += 1;
        let path = self.scratch.join(format!("title-{}.png", self.reads));
        region
            .save(&path)
            .with_context(|| format!("Failed to write title region: {}", path.display()))?;

        let output = Command::new(&self.program)
            .args(self.args_for(&path))
            .output()
            .with_context(|| format!("Failed to run OCR command '{}'", self.program));
        let _ = std::fs::remove_file(&path);
        let output = output?;

        if !output.status.success() {
            bail!(
                "OCR command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!text.is_empty()).then_some(text))
    }
}

impl NameReader for CommandNameReader {
    fn read_name(&mut self, region: &RgbImage) -> Option<String> {
        match self.run(region) {
            Ok(reading) => {
                debug!(reading = ?reading, "OCR reading");
                reading
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "OCR failed");
                None
            }
        }
    }
}

impl Drop for CommandNameReader {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_placeholder_substitution() {
        let reader = CommandNameReader::new("tesseract {} stdout --psm 7").unwrap();
        assert_eq!(
            reader.args_for(Path::new("/tmp/t.png")),
            vec!["/tmp/t.png", "stdout", "--psm", "7"]
        );

        let appended = CommandNameReader::new("ocr-title --lang en").unwrap();
        assert_eq!(
            appended.args_for(Path::new("r.png")),
            vec!["--lang", "en", "r.png"]
        );
    }

    #[test]
    fn test_empty_command_is_rejected() {
        assert!(CommandNameReader::new("   ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_reads_command_stdout() {
        let region = RgbImage::from_pixel(40, 10, Rgb([200, 200, 200]));

        let mut echo = CommandNameReader::new("echo  Lightning Bolt ").unwrap();
        let reading = echo.read_name(&region).unwrap();
        assert!(reading.starts_with("Lightning Bolt "));

        let mut failing = CommandNameReader::new("false").unwrap();
        assert_eq!(failing.read_name(&region), None);
    }
}
