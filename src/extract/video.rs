//! Video extractor backed by external tools.
//!
//! `ffprobe` supplies duration, resolution and frame rate, `ffmpeg` writes the audio
//! track to a temporary WAV file, and a configured speech-to-text command turns that
//! file into the transcript that becomes the record content.

use super::extract_with;
use crate::config::VideoSettings;
use crate::error::ExtractionError;
use crate::record::{ResourceMetadata, ResourceRecord, ResourceType};
use crate::traits::Extractor;
use log::{debug, warn};
use serde::Deserialize;
use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const AUDIO_PLACEHOLDER: &str = "{audio}";
const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub struct VideoExtractor {
    settings: VideoSettings,
    timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl VideoExtractor {
    /// `timeout` bounds all external commands run for one file together.
    pub fn new(settings: VideoSettings, timeout: Option<Duration>) -> Self {
        Self { settings, timeout }
    }

    fn convert(
        &self,
        path: &Path,
        metadata: &mut ResourceMetadata,
    ) -> Result<String, ExtractionError> {
        let deadline = Deadline::new(self.timeout);

        let probe = self.probe(path, &deadline)?;
        apply_probe(&probe, metadata);
        if let Some(language) = &self.settings.language {
            metadata.insert("language", language.as_str());
        }

        let transcriber = self
            .settings
            .transcriber
            .as_ref()
            .ok_or_else(|| ExtractionError::ToolMissing("speech-to-text transcriber".to_string()))?;

        // removed when dropped, on every return path below
        let mut builder = tempfile::Builder::new();
        builder.prefix("eduindex-audio-").suffix(".wav");
        let audio = match &self.settings.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        }
        .into_temp_path();

        let ffmpeg_args: Vec<OsString> = vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            path.into(),
            "-vn".into(),
            "-ac".into(),
            "1".into(),
            "-ar".into(),
            "16000".into(),
            "-f".into(),
            "wav".into(),
            audio.to_path_buf().into(),
        ];
        run_tool(&self.settings.ffmpeg, &ffmpeg_args, &deadline)?;

        let args = transcriber_args(&transcriber.args, &audio);
        let transcript = run_tool(&transcriber.program, &args, &deadline)?;
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(ExtractionError::Empty);
        }
        Ok(transcript.to_string())
    }

    fn probe(&self, path: &Path, deadline: &Deadline) -> Result<ProbeOutput, ExtractionError> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-print_format".into(),
            "json".into(),
            "-show_format".into(),
            "-show_streams".into(),
            path.into(),
        ];
        let output = run_tool(&self.settings.ffprobe, &args, deadline)?;
        serde_json::from_str(&output).map_err(|e| ExtractionError::Decode {
            kind: "ffprobe output",
            reason: e.to_string(),
        })
    }
}

impl Extractor for VideoExtractor {
    fn name(&self) -> &'static str {
        "video"
    }

    fn resource_type(&self) -> ResourceType {
        ResourceType::Video
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["mp4", "avi", "mkv", "mov", "webm"]
    }

    fn extract(&self, path: &Path) -> ResourceRecord {
        extract_with(path, ResourceType::Video, |path, metadata| {
            self.convert(path, metadata)
        })
    }
}

fn apply_probe(probe: &ProbeOutput, metadata: &mut ResourceMetadata) {
    if let Some(duration) = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
    {
        metadata.insert("duration_seconds", duration);
    }

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    if let Some(stream) = video {
        if let (Some(width), Some(height)) = (stream.width, stream.height) {
            metadata.insert("resolution", format!("{}x{}", width, height));
        }
        let fps = stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));
        if let Some(fps) = fps {
            metadata.insert("fps", (fps * 100.0).round() / 100.0);
        }
    }
}

/// Parses ffprobe rates such as `30000/1001` or `25`.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value > 0.0).then_some(value)
}

fn transcriber_args(template: &[String], audio: &Path) -> Vec<OsString> {
    let mut substituted = false;
    let mut args: Vec<OsString> = template
        .iter()
        .map(|arg| {
            if arg.contains(AUDIO_PLACEHOLDER) {
                substituted = true;
                arg.replace(AUDIO_PLACEHOLDER, &audio.to_string_lossy()).into()
            } else {
                arg.into()
            }
        })
        .collect();
    if !substituted {
        args.push(audio.into());
    }
    args
}

/// Remaining time budget shared by the commands run for one file.
struct Deadline {
    limit: Option<(Instant, Duration)>,
}

impl Deadline {
    fn new(timeout: Option<Duration>) -> Self {
        Self {
            limit: timeout.map(|t| (Instant::now() + t, t)),
        }
    }

    fn expired(&self) -> Option<ExtractionError> {
        match self.limit {
            Some((at, total)) if Instant::now() >= at => Some(ExtractionError::Timeout(total)),
            _ => None,
        }
    }
}

/// Runs `program`, killing it when the deadline passes. Returns its stdout.
fn run_tool(
    program: &str,
    args: &[OsString],
    deadline: &Deadline,
) -> Result<String, ExtractionError> {
    if let Some(err) = deadline.expired() {
        return Err(err);
    }
    debug!("Running {} {:?}", program, args);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExtractionError::ToolMissing(program.to_string()),
            _ => ExtractionError::Io(e),
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let status = wait(&mut child, deadline, program)?;

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr);
        let reason = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| status.to_string());
        return Err(ExtractionError::ToolFailed {
            tool: program.to_string(),
            reason,
        });
    }
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn wait(child: &mut Child, deadline: &Deadline, program: &str) -> Result<ExitStatus, ExtractionError> {
    if deadline.limit.is_none() {
        return Ok(child.wait()?);
    }
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if let Some(err) = deadline.expired() {
            warn!("Killing {} after the extraction timeout", program);
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscriberSettings;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn scratch_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    const PROBE_JSON: &str = r#"{
        "streams": [
            {"codec_type": "audio", "sample_rate": "44100"},
            {"codec_type": "video", "width": 1280, "height": 720,
             "avg_frame_rate": "30000/1001", "r_frame_rate": "30/1"}
        ],
        "format": {"duration": "12.500000"}
    }"#;

    #[test]
    fn test_apply_probe() {
        let probe: ProbeOutput = serde_json::from_str(PROBE_JSON).unwrap();
        let mut metadata = ResourceMetadata::for_path(Path::new("lecture.mp4"), ResourceType::Video);
        apply_probe(&probe, &mut metadata);

        assert_eq!(metadata.get("duration_seconds"), Some(&12.5.into()));
        assert_eq!(metadata.get("resolution"), Some(&"1280x720".into()));
        assert_eq!(metadata.get("fps"), Some(&29.97.into()));
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("50/2"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("n/a"), None);
    }

    #[test]
    fn test_transcriber_args_substitution() {
        let audio = Path::new("/tmp/a.wav");
        let args = transcriber_args(&["-f".to_string(), "{audio}".to_string()], audio);
        assert_eq!(args, vec![OsString::from("-f"), OsString::from("/tmp/a.wav")]);

        let args = transcriber_args(&["--quiet".to_string()], audio);
        assert_eq!(args.last(), Some(&OsString::from("/tmp/a.wav")));
    }

    #[test]
    fn test_missing_tool_is_an_error_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lecture.mp4");
        std::fs::write(&path, b"\x00\x00\x00\x18ftypmp42").unwrap();

        let settings = VideoSettings {
            ffprobe: "eduindex-no-such-ffprobe".to_string(),
            ..VideoSettings::default()
        };
        let record = VideoExtractor::new(settings, None).extract(&path);
        assert!(record.has_error());
        assert!(
            record
                .metadata
                .error
                .as_deref()
                .unwrap()
                .contains("eduindex-no-such-ffprobe")
        );
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[test]
    fn test_full_pipeline_with_stub_tools() {
        let tools = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let path = media.path().join("lecture.mp4");
        std::fs::write(&path, b"fake video").unwrap();

        let probe_body = format!("cat <<'EOF'\n{}\nEOF", PROBE_JSON);
        let settings = VideoSettings {
            ffprobe: write_script(tools.path(), "ffprobe", &probe_body),
            // the output path is the last argument
            ffmpeg: write_script(tools.path(), "ffmpeg", "for a; do out=\"$a\"; done; printf 'RIFF' > \"$out\""),
            transcriber: Some(TranscriberSettings {
                program: write_script(
                    tools.path(),
                    "transcribe",
                    "test -s \"$1\" && echo 'Today we cover loops and recursion.'",
                ),
                args: vec!["{audio}".to_string()],
            }),
            language: Some("en".to_string()),
            scratch_dir: Some(scratch.path().to_path_buf()),
        };

        let record = VideoExtractor::new(settings, Some(Duration::from_secs(30))).extract(&path);
        assert!(!record.has_error(), "{:?}", record.metadata.error);
        assert_eq!(record.content(), "Today we cover loops and recursion.");
        assert_eq!(record.metadata.get("language"), Some(&"en".into()));
        assert_eq!(record.metadata.get("resolution"), Some(&"1280x720".into()));
        assert!(scratch_files(scratch.path()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_tool_and_cleans_up() {
        let tools = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let path = media.path().join("lecture.mp4");
        std::fs::write(&path, b"fake video").unwrap();

        let probe_body = format!("cat <<'EOF'\n{}\nEOF", PROBE_JSON);
        let settings = VideoSettings {
            ffprobe: write_script(tools.path(), "ffprobe", &probe_body),
            ffmpeg: write_script(tools.path(), "ffmpeg", "sleep 10"),
            transcriber: Some(TranscriberSettings {
                program: "true".to_string(),
                args: vec![],
            }),
            language: None,
            scratch_dir: Some(scratch.path().to_path_buf()),
        };

        let started = Instant::now();
        let record =
            VideoExtractor::new(settings, Some(Duration::from_millis(300))).extract(&path);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(record.has_error());
        assert!(record.metadata.error.as_deref().unwrap().contains("timed out"));
        assert!(scratch_files(scratch.path()).is_empty());
    }
}
