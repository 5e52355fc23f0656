//! Optional media metadata probes.
//!
//! A probe is a capability, not a dependency: when `is_available` is false or
//! probing fails, metadata extraction proceeds with base facts only.

use exif::{Exif, In, Tag};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

pub trait MetadataProbe: Send + Sync {
    /// Whether the probe can run on this machine at all.
    fn is_available(&self) -> bool;

    /// Whether the probe understands files with this (lowercase, dotted) extension.
    fn supports(&self, extension: &str) -> bool;

    /// Extra metadata for `path`, or `None` when nothing could be read.
    fn probe(&self, path: &Path) -> Option<Map<String, Value>>;
}

const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".m4v", ".mkv", ".avi", ".webm"];

/// Reads width, height, duration and codec of the first video stream with
/// the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: String,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        FfprobeProbe {
            program: "ffprobe".to_string(),
        }
    }
}

impl FfprobeProbe {
    pub fn with_program(program: impl Into<String>) -> Self {
        FfprobeProbe {
            program: program.into(),
        }
    }
}

impl MetadataProbe for FfprobeProbe {
    fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn supports(&self, extension: &str) -> bool {
        VIDEO_EXTENSIONS.contains(&extension)
    }

    fn probe(&self, path: &Path) -> Option<Map<String, Value>> {
        let output = Command::new(&self.program)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,duration,codec_name",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            debug!(path = %path.display(), "ffprobe exited with failure");
            return None;
        }
        parse_ffprobe_output(&output.stdout)
    }
}

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".tif", ".tiff", ".webp"];

/// EXIF fields kept, under the names they are stored as.
const EXIF_FIELDS: &[(Tag, &str)] = &[
    (Tag::DateTimeOriginal, "DateTimeOriginal"),
    (Tag::Model, "Model"),
    (Tag::Make, "Make"),
    (Tag::LensModel, "LensModel"),
    (Tag::FNumber, "FNumber"),
    (Tag::ExposureTime, "ExposureTime"),
    (Tag::PhotographicSensitivity, "ISOSpeedRatings"),
];

/// Reads pixel dimensions from the image header and a few EXIF fields.
/// Needs no external program.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageProbe;

impl MetadataProbe for ImageProbe {
    fn is_available(&self) -> bool {
        true
    }

    fn supports(&self, extension: &str) -> bool {
        IMAGE_EXTENSIONS.contains(&extension)
    }

    fn probe(&self, path: &Path) -> Option<Map<String, Value>> {
        let mut meta = Map::new();
        match imagesize::size(path) {
            Ok(size) => {
                meta.insert("width".to_string(), Value::from(size.width));
                meta.insert("height".to_string(), Value::from(size.height));
            }
            Err(e) => debug!(path = %path.display(), error = %e, "cannot read image size"),
        }

        match read_exif(path) {
            Ok(exif) => {
                meta.insert("exif".to_string(), Value::Object(exif_fields(&exif)));
            }
            Err(exif::Error::NotFound(_)) => {}
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot read exif");
                meta.insert("exif".to_string(), Value::Object(Map::new()));
            }
        }

        meta.insert("type".to_string(), Value::from("image"));
        Some(meta)
    }
}

fn read_exif(path: &Path) -> Result<Exif, exif::Error> {
    let file = File::open(path)?;
    exif::Reader::new().read_from_container(&mut BufReader::new(file))
}

fn exif_fields(exif: &Exif) -> Map<String, Value> {
    let mut fields = Map::new();
    for (tag, name) in EXIF_FIELDS {
        let Some(field) = exif.get_field(*tag, In::PRIMARY) else {
            continue;
        };
        let text = match &field.value {
            exif::Value::Ascii(parts) => parts
                .first()
                .map(|p| String::from_utf8_lossy(p).trim_end_matches('\0').to_string())
                .unwrap_or_default(),
            _ => field.display_value().to_string(),
        };
        fields.insert(name.to_string(), Value::from(text));
    }
    fields
}

fn parse_ffprobe_output(stdout: &[u8]) -> Option<Map<String, Value>> {
    let data: Value = serde_json::from_slice(stdout).ok()?;
    let stream = data.get("streams")?.as_array()?.first()?;

    let mut meta = Map::new();
    for (from, to) in [("width", "width"), ("height", "height"), ("codec_name", "codec")] {
        if let Some(v) = stream.get(from).filter(|v| !v.is_null()) {
            meta.insert(to.to_string(), v.clone());
        }
    }
    // ffprobe reports duration as a decimal string.
    let duration = stream.get("duration").and_then(|d| match d {
        Value::String(s) => s.parse::<f64>().ok(),
        other => other.as_f64(),
    });
    if let Some(duration) = duration {
        meta.insert("duration".to_string(), Value::from(duration));
    }
    meta.insert("type".to_string(), Value::from("video"));
    Some(meta)
}
