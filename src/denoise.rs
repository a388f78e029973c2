use std::path::Path;

use log::debug;
use regex::Regex;
use serde::Serialize;

use crate::command::{io_err, run_command, run_command_deadline};
use crate::config::CONFIG;
use crate::models::{DenoiseParams, Method};

/// The denoise operation as the worker sees it: a black box that either
/// writes the output file or says why it couldn't.
pub trait Denoiser: Send + Sync {
    fn denoise(
        &self,
        input: &Path,
        output: &Path,
        params: &DenoiseParams,
    ) -> std::io::Result<()>;
}

/// Production implementation backed by ffmpeg's still-image filters.
pub struct FfmpegDenoiser;

impl Denoiser for FfmpegDenoiser {
    fn denoise(
        &self,
        input: &Path,
        output: &Path,
        params: &DenoiseParams,
    ) -> std::io::Result<()> {
        let input = path_str(input)?;
        let output = path_str(output)?;

        let arguments = vec![
            "-hide_banner".to_owned(),
            "-i".to_owned(),
            input.to_owned(),
            "-vf".to_owned(),
            filter_graph(params),
            "-y".to_owned(),
            output.to_owned(),
        ];

        run_command_deadline("ffmpeg", arguments, "ffmpeg denoise", CONFIG.denoise_timeout)
    }
}

fn path_str(path: &Path) -> std::io::Result<&str> {
    path.to_str()
        .ok_or_else(|| io_err("path is not valid UTF-8"))
}

/// Maps strength 1..=10 onto each filter's own parameter range. Strength is
/// clamped again here so a hand-built `DenoiseParams` can't feed ffmpeg an
/// out-of-range value.
fn filter_graph(params: &DenoiseParams) -> String {
    let strength = f64::from(params.strength.clamp(1, 10));

    let mut filters = vec![match params.method {
        Method::Nlmeans => format!("nlmeans=s={strength:.1}"),
        Method::Bilateral => format!(
            "bilateral=sigmaS={strength:.1}:sigmaR={:.2}",
            strength * 0.05
        ),
        Method::Gaussian => format!("gblur=sigma={:.1}", strength * 0.5),
    }];

    if params.grayscale {
        filters.push("format=gray".to_owned());
    }

    filters.join(",")
}

#[derive(Serialize, Debug)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

fn cap_u32(cap: &regex::Captures, i: usize) -> std::io::Result<u32> {
    cap.get(i)
        .map(|m| m.as_str())
        .and_then(|text| text.parse::<u32>().ok())
        .ok_or_else(|| io_err("unparseable dimension"))
}

/// Confirms the uploaded file decodes as an image by running it through
/// ffprobe and scraping the stream dimensions out of its stderr.
pub fn probe(path: &Path) -> std::io::Result<ImageInfo> {
    let path = path_str(path)?;
    let output = run_command("ffprobe", vec![path.to_owned()], "ffprobe")?;

    let text = String::from_utf8(output.stderr).map_err(|_| io_err("invalid encoding"))?;

    debug!("probe output: {}", text);

    let resolution_re = Regex::new(r"(?m)^\s*Stream [^ ]+: Video: .*, (\d+)x(\d+)").unwrap();
    let resolution_cap = resolution_re
        .captures(&text)
        .ok_or(io_err("no image stream found"))?;

    Ok(ImageInfo {
        width: cap_u32(&resolution_cap, 1)?,
        height: cap_u32(&resolution_cap, 2)?,
    })
}
