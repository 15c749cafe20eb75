//! ffmpeg-backed video decoding and encoding
//!
//! Frames are exchanged with ffmpeg as raw `rgb24` over pipes, so the rest of
//! the system only ever sees `image::RgbImage`.

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use image::{codecs::jpeg::JpegEncoder, ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, error, warn};

/// Stream properties reported by ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Frames per second, `None` when the container does not say
    pub fps: Option<f64>,
}

/// Parse an ffprobe rate such as `30000/1001` or `25`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let rate = rate.trim();
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.parse().ok()?,
    };

    (value.is_finite() && value > 0.0).then_some(value)
}

/// Probe width, height and frame rate of the first video stream.
pub async fn probe_video(source: &str) -> Result<VideoInfo> {
    debug!(source = %source, "probing video stream");

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,avg_frame_rate",
            "-of",
            "csv=p=0",
            source,
        ])
        .output()
        .await
        .context("failed to execute ffprobe")?;

    if !output.status.success() {
        bail!("ffprobe could not open {}: {:?}", source, output.status);
    }

    let text = String::from_utf8(output.stdout).context("ffprobe output is not valid UTF-8")?;
    parse_probe_line(&text)
}

fn parse_probe_line(text: &str) -> Result<VideoInfo> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("ffprobe returned no video stream"))?;

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 2 {
        bail!("unexpected ffprobe output format: {}", line);
    }

    let width: u32 = fields[0].trim().parse().context("failed to parse width")?;
    let height: u32 = fields[1].trim().parse().context("failed to parse height")?;
    if width == 0 || height == 0 {
        bail!("video reports empty frame size {}x{}", width, height);
    }

    Ok(VideoInfo {
        width,
        height,
        fps: fields.get(2).and_then(|r| parse_frame_rate(r)),
    })
}

/// Input arguments for a file. Frames are decoded as stored: ffprobe reports
/// the coded size, and autorotation would swap it for rotated phone videos.
fn file_input(path: &Path) -> Vec<String> {
    vec![
        "-noautorotate".to_string(),
        "-i".to_string(),
        path.to_string_lossy().to_string(),
    ]
}

/// Decodes a video source into fixed-size RGB frames.
pub struct FrameReader {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    frames_read: u64,
}

impl FrameReader {
    /// Decode a file at its native resolution.
    pub fn open_file(path: &Path, width: u32, height: u32) -> Result<Self> {
        Self::spawn(file_input(path), width, height, false)
    }

    /// Capture from a V4L2 device, scaled to the requested size.
    pub fn open_device(device: &str, width: u32, height: u32) -> Result<Self> {
        let input = vec![
            "-f".to_string(),
            "v4l2".to_string(),
            "-i".to_string(),
            device.to_string(),
        ];
        Self::spawn(input, width, height, true)
    }

    /// Pull a network stream (RTSP, HLS, ...), scaled to the requested size.
    pub fn open_stream(url: &str, width: u32, height: u32) -> Result<Self> {
        let mut input = Vec::new();
        if url.starts_with("rtsp://") {
            input.push("-rtsp_transport".to_string());
            input.push("tcp".to_string());
        }
        input.push("-i".to_string());
        input.push(url.to_string());
        Self::spawn(input, width, height, true)
    }

    fn spawn(input: Vec<String>, width: u32, height: u32, scale: bool) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("frame size must be non-zero, got {}x{}", width, height);
        }

        let mut args = vec!["-hide_banner".to_string(), "-loglevel".to_string(), "error".to_string()];
        args.extend(input);
        if scale {
            args.push("-vf".to_string());
            args.push(format!("scale={}:{}", width, height));
        }
        args.extend(
            ["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"]
                .iter()
                .map(|s| s.to_string()),
        );

        debug!(args = ?args, "spawning ffmpeg decoder");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("failed to execute ffmpeg")?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("ffmpeg decoder has no stdout"))?;

        Ok(Self {
            child,
            stdout,
            width,
            height,
            frames_read: 0,
        })
    }

    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Next frame, or `None` once the source is exhausted.
    pub async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut buf = vec![0u8; self.frame_len()];
        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!(frames = self.frames_read, "video source exhausted");
                return Ok(None);
            }
            Err(e) => return Err(e).context("failed to read frame from ffmpeg"),
        }

        self.frames_read += 1;
        RgbImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| anyhow!("decoded frame does not match {}x{}", self.width, self.height))
    }

    /// Stop the decoder early.
    pub async fn close(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to stop ffmpeg decoder");
        }
    }
}

/// Encodes RGB frames into a web-friendly H.264 mp4.
pub struct VideoWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
    frames_written: u64,
}

impl VideoWriter {
    pub fn create(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-r".to_string(),
            format!("{}", fps),
            "-i".to_string(),
            "pipe:0".to_string(),
            // yuv420p needs even dimensions
            "-vf".to_string(),
            "scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            path.to_string_lossy().to_string(),
        ];

        debug!(args = ?args, "spawning ffmpeg encoder");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("failed to execute ffmpeg")?;

        let stdin = child.stdin.take();

        Ok(Self {
            child,
            stdin,
            width,
            height,
            frames_written: 0,
        })
    }

    pub async fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            bail!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            );
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("encoder input already closed"))?;
        stdin
            .write_all(frame.as_raw())
            .await
            .context("failed to write frame to ffmpeg")?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Close the input and wait for ffmpeg to finalise the container.
    pub async fn finish(mut self) -> Result<()> {
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .await
            .context("failed to wait for ffmpeg encoder")?;

        if !status.success() {
            error!(status = ?status, "ffmpeg encoding failed");
            bail!("ffmpeg exited with error: {:?}", status);
        }

        debug!(frames = self.frames_written, "video encoding finished");
        Ok(())
    }
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(buf.into_inner())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(image)
        .context("failed to encode JPEG")?;
    Ok(buf)
}

pub fn to_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// PNG wrapped as a `data:` URI, ready for an `<img src>`.
pub fn png_data_uri(image: &RgbImage) -> Result<String> {
    Ok(format!("data:image/png;base64,{}", to_base64(&encode_png(image)?)))
}

/// Decode a base64 (optionally `data:` URI) image into RGB.
pub fn decode_base64_image(data: &str) -> Result<RgbImage> {
    let payload = match data.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => data,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("failed to decode base64 image")?;
    decode_image(&bytes)
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    Ok(image::load_from_memory(bytes)
        .context("failed to load image")?
        .to_rgb8())
}
