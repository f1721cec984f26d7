//! ffmpeg child-process adapter
//!
//! Implements the audio toolchain capability surface by shelling out to
//! ffmpeg/ffprobe. Every write goes to a staging file next to the target
//! and is renamed into place on success, so a failed invocation never
//! leaves a partial output visible. Child processes carry a deadline and
//! are killed on drop, which is how cancellation reaches them.

use futures::future::BoxFuture;
use futures::FutureExt;
use spotforge_common::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

use super::{
    AudioProcessor, LoudnessPreset, MasteringPreset, MixOptions, VolumeSegment,
};

/// Per-call deadlines
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const FILTER_TIMEOUT: Duration = Duration::from_secs(60);
const MIX_TIMEOUT: Duration = Duration::from_secs(120);
const MEASURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Crossfade across loop joins
const LOOP_CROSSFADE: f64 = 0.05;
/// Gain ramp across volume-curve segment boundaries
const CURVE_FADE: f64 = 0.02;
/// Speed-only scaling clamp; the epsilon absorbs ratio rounding when the
/// caller lands exactly on a clamp edge
const STRETCH_MIN: f64 = 0.85;
const STRETCH_MAX: f64 = 1.25;
const STRETCH_EPS: f64 = 1e-6;

pub struct FfmpegProcessor {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegProcessor {
    /// Verify the binaries are reachable before the pipeline starts.
    pub fn new() -> Result<Self> {
        let processor = Self::with_binaries("ffmpeg", "ffprobe");
        match std::process::Command::new(&processor.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(_) => Ok(processor),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::ConfigMissing(
                "ffmpeg not found in PATH".to_string(),
            )),
            Err(e) => Err(Error::Internal(format!("cannot probe ffmpeg: {}", e))),
        }
    }

    pub fn with_binaries(ffmpeg: &str, ffprobe: &str) -> Self {
        Self {
            ffmpeg: ffmpeg.to_string(),
            ffprobe: ffprobe.to_string(),
        }
    }

    async fn run(&self, binary: &str, args: &[String], timeout: Duration) -> Result<std::process::Output> {
        tracing::debug!(binary, ?args, "spawning audio toolchain");
        let child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("cannot spawn {}: {}", binary, e)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout(format!("{} exceeded {}s", binary, timeout.as_secs())))?
            .map_err(|e| Error::Internal(format!("{} failed: {}", binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join(" | ");
            return Err(Error::Internal(format!(
                "{} exited with {}: {}",
                binary, output.status, tail
            )));
        }
        Ok(output)
    }

    /// Run an ffmpeg command that writes `output`, staged and renamed.
    async fn run_to_file(
        &self,
        mut args: Vec<String>,
        output: &Path,
        timeout: Duration,
    ) -> Result<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staging = staging_path(output);
        args.push(staging.display().to_string());

        let result = self.run(&self.ffmpeg, &args, timeout).await;
        match result {
            Ok(_) => {
                std::fs::rename(&staging, output)?;
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&staging);
                Err(e)
            }
        }
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "csv=p=0".to_string(),
            path.display().to_string(),
        ];
        let output = self.run(&self.ffprobe, &args, PROBE_TIMEOUT).await?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<f64>()
            .map_err(|e| Error::Internal(format!("unparsable duration '{}': {}", text.trim(), e)))
    }
}

/// Staging file next to the target so the final rename stays on one
/// filesystem. Keeps the output extension so ffmpeg still infers the
/// container format.
fn staging_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "out".to_string());
    let name = match output.extension() {
        Some(ext) => format!(
            ".{}.{}.part.{}",
            stem,
            Uuid::new_v4().simple(),
            ext.to_string_lossy()
        ),
        None => format!(".{}.{}.part", stem, Uuid::new_v4().simple()),
    };
    output.with_file_name(name)
}

fn base_args() -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-y".to_string(),
    ]
}

/// `acrossfade` chain joining `copies` inputs, then a cut to `duration`.
fn loop_filter_graph(copies: usize, duration: f64) -> String {
    let mut graph = String::new();
    let mut current = "[0:a]".to_string();
    for i in 1..copies {
        let label = if i + 1 == copies {
            "[joined]".to_string()
        } else {
            format!("[x{}]", i)
        };
        graph.push_str(&format!(
            "{}[{}:a]acrossfade=d={}:c1=tri:c2=tri{};",
            current, i, LOOP_CROSSFADE, label
        ));
        current = label;
    }
    graph.push_str(&format!(
        "{}atrim=end={:.4},asetpts=N/SR/TB[out]",
        current, duration
    ));
    graph
}

/// Gain expression for the volume filter: unity outside all segments, the
/// segment multiplier inside, with 20 ms linear ramps at the edges.
/// Commas are escaped for the filtergraph parser.
fn volume_curve_expr(segments: &[VolumeSegment], total_duration: f64) -> String {
    let mut expr = "1".to_string();
    for segment in segments.iter().rev() {
        let start = segment.start.max(0.0);
        let end = segment.end.min(total_duration);
        if end <= start {
            continue;
        }
        let m = segment.multiplier;
        let fade = CURVE_FADE.min((end - start) / 2.0);
        let inner = if fade > 0.0 {
            format!(
                "if(lt(t,{s}+{f}),1+({m}-1)*(t-{s})/{f},if(gt(t,{e}-{f}),{m}+(1-{m})*(t-({e}-{f}))/{f},{m}))",
                s = fmt(start),
                e = fmt(end),
                f = fmt(fade),
                m = fmt(m),
            )
        } else {
            fmt(m)
        };
        expr = format!(
            "if(between(t,{s},{e}),{inner},{expr})",
            s = fmt(start),
            e = fmt(end),
            inner = inner,
            expr = expr
        );
    }
    expr.replace(',', "\\,")
}

fn fmt(v: f64) -> String {
    format!("{:.4}", v)
}

/// Pull the loudnorm JSON block off ffmpeg's stderr and read `input_i`.
fn parse_loudnorm_input_i(stderr: &str) -> Result<f64> {
    let start = stderr
        .rfind('{')
        .ok_or_else(|| Error::LoudnessMeasureFailed("no loudnorm JSON in output".into()))?;
    let end = stderr[start..]
        .find('}')
        .map(|i| start + i + 1)
        .ok_or_else(|| Error::LoudnessMeasureFailed("unterminated loudnorm JSON".into()))?;
    let value: serde_json::Value = serde_json::from_str(&stderr[start..end])
        .map_err(|e| Error::LoudnessMeasureFailed(format!("bad loudnorm JSON: {}", e)))?;
    value
        .get("input_i")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| Error::LoudnessMeasureFailed("loudnorm JSON lacks input_i".into()))
}

impl AudioProcessor for FfmpegProcessor {
    fn get_duration<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<f64>> {
        async move { self.probe_duration(path).await }.boxed()
    }

    fn trim<'a>(
        &'a self,
        input: &'a Path,
        duration: f64,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut args = base_args();
            args.extend([
                "-i".to_string(),
                input.display().to_string(),
                "-af".to_string(),
                format!("atrim=end={:.4},asetpts=N/SR/TB", duration),
            ]);
            self.run_to_file(args, output, FILTER_TIMEOUT).await
        }
        .boxed()
    }

    fn extend_by_loop<'a>(
        &'a self,
        input: &'a Path,
        duration: f64,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let source = self.probe_duration(input).await?;
            if source <= 0.0 {
                return Err(Error::Internal("cannot loop a zero-length bed".into()));
            }
            let copies = (duration / source).ceil() as usize;
            if copies <= 1 {
                return self.trim(input, duration, output).await;
            }

            let mut args = base_args();
            for _ in 0..copies {
                args.push("-i".to_string());
                args.push(input.display().to_string());
            }
            args.extend([
                "-filter_complex".to_string(),
                loop_filter_graph(copies, duration),
                "-map".to_string(),
                "[out]".to_string(),
            ]);
            self.run_to_file(args, output, MIX_TIMEOUT).await
        }
        .boxed()
    }

    fn stretch_to_duration<'a>(
        &'a self,
        input: &'a Path,
        duration: f64,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let source = self.probe_duration(input).await?;
            let ratio = source / duration;
            if ratio < STRETCH_MIN - STRETCH_EPS || ratio > STRETCH_MAX + STRETCH_EPS {
                return Err(Error::ScalingRefused(format!(
                    "ratio {:.3} outside [{}, {}]",
                    ratio, STRETCH_MIN, STRETCH_MAX
                )));
            }
            let mut args = base_args();
            args.extend([
                "-i".to_string(),
                input.display().to_string(),
                "-af".to_string(),
                format!("atempo={:.6},atrim=end={:.4}", ratio, duration),
            ]);
            self.run_to_file(args, output, FILTER_TIMEOUT).await
        }
        .boxed()
    }

    fn apply_volume_curve<'a>(
        &'a self,
        input: &'a Path,
        segments: &'a [VolumeSegment],
        total_duration: f64,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let expr = volume_curve_expr(segments, total_duration);
            let mut args = base_args();
            args.extend([
                "-i".to_string(),
                input.display().to_string(),
                "-af".to_string(),
                format!("volume=volume='{}':eval=frame", expr),
            ]);
            self.run_to_file(args, output, FILTER_TIMEOUT).await
        }
        .boxed()
    }

    fn measure_loudness<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<f64>> {
        async move {
            let args = vec![
                "-hide_banner".to_string(),
                "-nostats".to_string(),
                "-i".to_string(),
                path.display().to_string(),
                "-af".to_string(),
                "loudnorm=I=-16:TP=-1.5:LRA=11:print_format=json".to_string(),
                "-f".to_string(),
                "null".to_string(),
                "-".to_string(),
            ];
            let output = self
                .run(&self.ffmpeg, &args, MEASURE_TIMEOUT)
                .await
                .map_err(|e| match e {
                    Error::Timeout(msg) => Error::Timeout(msg),
                    other => Error::LoudnessMeasureFailed(other.to_string()),
                })?;
            parse_loudnorm_input_i(&String::from_utf8_lossy(&output.stderr))
        }
        .boxed()
    }

    fn mix<'a>(
        &'a self,
        options: &'a MixOptions,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut args = base_args();
            let mut graph = String::new();
            let mut input_index = 0usize;

            let voice_label = if let Some(voice) = &options.voice {
                let duration = self.probe_duration(&voice.path).await?;
                args.push("-i".to_string());
                args.push(voice.path.display().to_string());
                let delay_ms = (voice.delay.max(0.0) * 1000.0).round() as u64;
                let fade_out_start = (voice.delay + duration - voice.fade_out).max(voice.delay);
                graph.push_str(&format!(
                    "[{idx}:a]adelay={d}|{d}:all=1,volume={v:.4},afade=t=in:st={fis:.4}:d={fi:.4}:curve={c},afade=t=out:st={fos:.4}:d={fo:.4}:curve={c}[v];",
                    idx = input_index,
                    d = delay_ms,
                    v = voice.volume,
                    fis = voice.delay,
                    fi = voice.fade_in,
                    fos = fade_out_start,
                    fo = voice.fade_out,
                    c = voice.fade_curve.toolchain_name(),
                ));
                input_index += 1;
                Some("[v]")
            } else {
                None
            };

            let music_label = if let Some(music) = &options.music {
                args.push("-i".to_string());
                args.push(music.path.display().to_string());
                graph.push_str(&format!(
                    "[{idx}:a]volume={v:.4}[m];",
                    idx = input_index,
                    v = music.volume
                ));
                Some("[m]")
            } else {
                None
            };

            let mixed = match (voice_label, music_label) {
                (Some(_), Some(_)) => {
                    if options.audio_ducking {
                        let ratio = (2.0 + options.ducking_amount * 8.0).clamp(1.0, 20.0);
                        graph.push_str(&format!(
                            "[v]asplit=2[vmix][vkey];[m][vkey]sidechaincompress=threshold=0.015:ratio={:.2}:attack=20:release=300[md];[vmix][md]amix=inputs=2:duration=longest:dropout_transition=0:normalize=0[mix]",
                            ratio
                        ));
                    } else {
                        graph.push_str(
                            "[v][m]amix=inputs=2:duration=longest:dropout_transition=0:normalize=0[mix]",
                        );
                    }
                    "[mix]"
                }
                (Some(_), None) => {
                    graph.push_str("[v]anull[mix]");
                    "[mix]"
                }
                (None, Some(_)) => {
                    graph.push_str("[m]anull[mix]");
                    "[mix]"
                }
                (None, None) => {
                    return Err(Error::Validation("mix needs at least one input".into()))
                }
            };

            let mut post = String::new();
            if options.normalize_loudness {
                post.push_str(&format!(
                    ",loudnorm=I={:.1}:TP={:.1}:LRA=11",
                    options.loudness_target_lufs, options.loudness_true_peak
                ));
            }
            if let Some(max) = options.max_duration {
                let fade_start = (max - 0.5).max(0.0);
                post.push_str(&format!(
                    ",afade=t=out:st={:.4}:d=0.5,atrim=end={:.4}",
                    fade_start, max
                ));
            }
            if !post.is_empty() {
                graph.push_str(&format!(";{}anull{}[final]", mixed, post));
                args.extend([
                    "-filter_complex".to_string(),
                    graph,
                    "-map".to_string(),
                    "[final]".to_string(),
                ]);
            } else {
                args.extend([
                    "-filter_complex".to_string(),
                    graph,
                    "-map".to_string(),
                    mixed.to_string(),
                ]);
            }

            self.run_to_file(args, output, MIX_TIMEOUT).await
        }
        .boxed()
    }

    fn master<'a>(
        &'a self,
        input: &'a Path,
        preset: MasteringPreset,
        loudness: LoudnessPreset,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let eq = match preset {
                MasteringPreset::Balanced => "",
                MasteringPreset::VoiceEnhanced => "equalizer=f=2800:t=q:w=1:g=2,",
                MasteringPreset::MusicEnhanced => "equalizer=f=90:t=q:w=1:g=2,",
            };
            let chain = format!(
                "highpass=f=40,{}acompressor=threshold=-18dB:ratio=3:attack=10:release=250,alimiter=limit=0.95,loudnorm=I={:.1}:TP=-1.5",
                eq,
                loudness.target_lufs()
            );
            let mut args = base_args();
            args.extend([
                "-i".to_string(),
                input.display().to_string(),
                "-af".to_string(),
                chain,
            ]);
            self.run_to_file(args, output, MIX_TIMEOUT).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_graph_joins_every_copy() {
        let graph = loop_filter_graph(3, 30.0);
        assert!(graph.contains("[0:a][1:a]acrossfade"));
        assert!(graph.contains("[x1][2:a]acrossfade"));
        assert!(graph.contains("atrim=end=30.0000"));
        assert!(graph.ends_with("[out]"));
    }

    #[test]
    fn loop_graph_for_two_copies_has_single_join() {
        let graph = loop_filter_graph(2, 12.5);
        assert!(graph.starts_with("[0:a][1:a]acrossfade"));
        assert_eq!(graph.matches("acrossfade").count(), 1);
    }

    #[test]
    fn volume_expr_covers_segments_with_ramps() {
        let segments = [
            VolumeSegment {
                start: 2.0,
                end: 5.0,
                multiplier: 0.3,
            },
            VolumeSegment {
                start: 8.0,
                end: 9.0,
                multiplier: 0.5,
            },
        ];
        let expr = volume_curve_expr(&segments, 12.0);
        assert!(expr.contains("between(t\\,2.0000\\,5.0000)"));
        assert!(expr.contains("between(t\\,8.0000\\,9.0000)"));
        assert!(expr.contains("0.3000"));
        assert!(expr.contains("0.5000"));
        // Unity gain fallback survives at the tail of the nesting
        assert!(expr.contains("\\,1)"));
        assert!(!expr.contains(",2.0000"), "commas must be escaped");
    }

    #[test]
    fn volume_expr_clips_to_total_duration() {
        let segments = [VolumeSegment {
            start: 10.0,
            end: 99.0,
            multiplier: 0.4,
        }];
        let expr = volume_curve_expr(&segments, 20.0);
        assert!(expr.contains("20.0000"));
        assert!(!expr.contains("99.0000"));
    }

    #[test]
    fn loudnorm_json_parses_input_i() {
        let stderr = r#"
[Parsed_loudnorm_0 @ 0x5618]
{
    "input_i" : "-12.34",
    "input_tp" : "-1.20",
    "output_i" : "-16.00"
}
"#;
        let lufs = parse_loudnorm_input_i(stderr).unwrap();
        assert!((lufs + 12.34).abs() < 1e-9);
    }

    #[test]
    fn loudnorm_json_missing_is_measure_failed() {
        let err = parse_loudnorm_input_i("no json here").unwrap_err();
        assert!(matches!(err, Error::LoudnessMeasureFailed(_)));
    }

    #[test]
    fn staging_paths_keep_directory_and_extension() {
        let out = Path::new("/srv/uploads/music/trimmed_x.mp3");
        let staging = staging_path(out);
        assert_eq!(staging.parent(), out.parent());
        let name = staging.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with('.'));
        assert!(name.contains(".part."));
        assert!(name.ends_with(".mp3"));
    }
}
