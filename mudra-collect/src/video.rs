use anyhow::{Context, Error, Result};
use image::{EncodableLayout, RgbImage};
use tracing::{debug, error, info};

use std::io::Write;
use std::process::{Command, Stdio};

use nokhwa::{
    Camera, nokhwa_initialize,
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType},
};

/// Opens `index`, or the last enumerated camera when unset.
pub fn create_input_stream(index: Option<u32>, fps: u32) -> Result<Camera> {
    nokhwa_initialize(|granted| {
        debug!("User said {}", granted);
    });

    let cameras = query(ApiBackend::Auto).context("Could not list cameras")?;
    cameras
        .iter()
        .for_each(|cam| debug!("Found camera: {:?}", cam));

    let index = match index {
        Some(i) => CameraIndex::Index(i),
        None => cameras
            .last()
            .map(|c| c.index().clone())
            .ok_or_else(|| Error::msg("No camera found"))?,
    };

    let mut camera = Camera::new(
        index.clone(),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
    )
    .with_context(|| format!("Could not open camera {index:?}"))?;

    if let Err(e) = camera.set_frame_rate(fps) {
        debug!("Camera kept its own frame rate: {e}");
    }
    camera
        .open_stream()
        .with_context(|| format!("Could not start camera {index:?}"))?;

    let resolution = camera.resolution();
    info!(
        "Opened camera {index:?} at {}x{}",
        resolution.width(),
        resolution.height()
    );
    Ok(camera)
}

/// Annotated frames piped to an `ffplay` window.
pub struct PreviewWindow {
    output_proc: std::process::Child,
}

impl Drop for PreviewWindow {
    fn drop(&mut self) {
        if let Err(e) = self.output_proc.kill() {
            error!("Failed to stop preview process {e:?}");
        }
    }
}

impl PreviewWindow {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let output_proc = Command::new("ffplay")
            .args([
                "-f",
                "rawvideo",
                "-pixel_format",
                "rgb24",
                "-video_size",
                &format!("{}x{}", width, height),
                "-window_title",
                "mudra-collect",
                "-fflags",
                "nobuffer",
                "-flags",
                "low_delay",
                "-loglevel",
                "quiet",
                "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Could not start ffplay for the preview window")?;

        Ok(Self { output_proc })
    }

    pub fn write_frame(&mut self, img: &RgbImage) -> Result<()> {
        if let Some(stdin) = self.output_proc.stdin.as_mut() {
            stdin.write_all(img.as_bytes())?;
        }

        Ok(())
    }
}
