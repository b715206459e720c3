use crate::configuration::types::TranscoderConfig;
use crate::network::session_router::DestinationAddress;

/// Builds the command line of the external transcoder for one destination.
pub trait TranscoderCommand: Send + Sync {
    fn program(&self) -> &str;

    fn args(&self, destination: &DestinationAddress) -> Vec<String>;
}

/// ffmpeg invocation for a live, open-ended push.
///
/// Media is read from stdin, encoded with a low-latency video profile and fixed-rate audio,
/// timestamped from the wall clock so that irregular browser chunks keep audio and video in sync,
/// and pushed to the destination as a live container with no known duration or size.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    config: TranscoderConfig,
}

impl FfmpegCommand {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }
}

impl TranscoderCommand for FfmpegCommand {
    fn program(&self) -> &str {
        &self.config.program
    }

    fn args(&self, destination: &DestinationAddress) -> Vec<String> {
        let c = &self.config;
        let mut args: Vec<String> = [
            "-use_wallclock_as_timestamps",
            "1",
            "-i",
            "-",
            "-c:v",
            c.video_codec.as_str(),
            "-preset",
            c.preset.as_str(),
            "-tune",
            c.tune.as_str(),
            "-c:a",
            c.audio_codec.as_str(),
            "-ar",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push(c.audio_sample_rate.to_string());
        args.extend(
            [
                "-b:a",
                c.audio_bitrate.as_str(),
                "-y",
                "-async",
                "1",
                "-bufsize",
                c.buffer_size.as_str(),
                "-f",
                c.output_format.as_str(),
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        if c.output_format == "flv" {
            args.push(String::from("-flvflags"));
            args.push(String::from("no_duration_filesize"));
        }
        args.push(String::from("-http_persistent"));
        args.push(String::from("0"));
        args.push(destination.to_string());
        args
    }
}
