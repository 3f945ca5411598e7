//! Remote video platform source (YouTube and similar).
//!
//! A page URL is first resolved to a direct media URL by an external resolver
//! (yt-dlp by default), then decoded with the same FFmpeg path as local files.
//! Neither the platform protocol nor the media transport is implemented here.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use url::Url;

#[cfg(feature = "ingest-ffmpeg")]
use super::ffmpeg::FfmpegSource;
use super::{is_stub, FrameSource, SourceKind, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{synthetic_frame, Frame};

/// Turns a platform page URL into a URL FFmpeg can open.
pub trait UrlResolver {
    fn resolve(&self, page_url: &Url) -> Result<String>;
}

const RESOLVER_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs an external program and takes the first non-empty stdout line.
///
/// The program is killed if it has not exited within `timeout`.
#[derive(Clone, Debug)]
pub struct CommandResolver {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandResolver {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

impl UrlResolver for CommandResolver {
    fn resolve(&self, page_url: &Url) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(page_url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("run URL resolver '{}'", self.program))?;

        // Resolver output is a single URL line, well under the pipe buffer.
        let started = Instant::now();
        loop {
            let exited = child
                .try_wait()
                .with_context(|| format!("wait for URL resolver '{}'", self.program))?;
            if exited.is_some() {
                break;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!(
                    "URL resolver '{}' did not finish within {:?}",
                    self.program,
                    self.timeout
                ));
            }
            std::thread::sleep(RESOLVER_POLL_INTERVAL);
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("collect URL resolver '{}' output", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "URL resolver '{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            ));
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("URL resolver '{}' printed no URL", self.program))
    }
}

/// Configuration for a remote video source.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    /// Page URL (e.g., "https://www.youtube.com/watch?v=..."), or `stub://name`.
    pub url: String,
    pub target_fps: u32,
    /// Synthetic frame width.
    pub width: u32,
    /// Synthetic frame height.
    pub height: u32,
    pub read_timeout: Duration,
}

pub struct RemoteVideoSource {
    config: RemoteConfig,
    resolver: Box<dyn UrlResolver>,
    backend: RemoteBackend,
}

enum RemoteBackend {
    Pending,
    Synthetic { frame_count: u64 },
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegSource),
}

impl RemoteVideoSource {
    pub fn new(config: RemoteConfig, resolver: Box<dyn UrlResolver>) -> PipelineResult<Self> {
        if !is_stub(&config.url) {
            validate_page_url(&config.url)
                .map_err(|err| PipelineError::config(format!("{:#}", err)))?;
        }
        Ok(Self {
            config,
            resolver,
            backend: RemoteBackend::Pending,
        })
    }

    fn connect_resolved(&mut self) -> Result<()> {
        let page_url = validate_page_url(&self.config.url)?;
        let media_url = self.resolver.resolve(&page_url)?;
        log::info!("RemoteVideoSource: resolved {}", self.config.url);
        #[cfg(feature = "ingest-ffmpeg")]
        {
            let mut source =
                FfmpegSource::new(SourceKind::RemoteVideo, media_url, self.config.read_timeout);
            source.connect()?;
            self.backend = RemoteBackend::Ffmpeg(source);
            Ok(())
        }
        #[cfg(not(feature = "ingest-ffmpeg"))]
        {
            let _ = media_url;
            Err(anyhow!(
                "cannot decode remote video: built without the ingest-ffmpeg feature"
            ))
        }
    }
}

impl FrameSource for RemoteVideoSource {
    fn kind(&self) -> SourceKind {
        SourceKind::RemoteVideo
    }

    fn open(&mut self) -> PipelineResult<()> {
        if is_stub(&self.config.url) {
            self.backend = RemoteBackend::Synthetic { frame_count: 0 };
            log::info!(
                "RemoteVideoSource: connected to {} (synthetic)",
                self.config.url
            );
            return Ok(());
        }
        self.connect_resolved()
            .map_err(|err| PipelineError::unavailable(SourceKind::RemoteVideo, err))
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        match &mut self.backend {
            RemoteBackend::Pending => Err(PipelineError::unavailable(
                SourceKind::RemoteVideo,
                anyhow!("remote video not opened"),
            )),
            RemoteBackend::Synthetic { frame_count } => {
                *frame_count += 1;
                let index = *frame_count;
                synthetic_frame(self.config.width, self.config.height, index, 4)
                    .map(Some)
                    .map_err(|err| PipelineError::frame_decode(index, err))
            }
            #[cfg(feature = "ingest-ffmpeg")]
            RemoteBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            RemoteBackend::Pending => false,
            RemoteBackend::Synthetic { .. } => true,
            #[cfg(feature = "ingest-ffmpeg")]
            RemoteBackend::Ffmpeg(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            RemoteBackend::Pending => SourceStats {
                origin: self.config.url.clone(),
                ..SourceStats::default()
            },
            RemoteBackend::Synthetic { frame_count } => SourceStats {
                frames_captured: *frame_count,
                frames_skipped: 0,
                origin: self.config.url.clone(),
            },
            #[cfg(feature = "ingest-ffmpeg")]
            RemoteBackend::Ffmpeg(source) => SourceStats {
                origin: self.config.url.clone(),
                ..source.stats()
            },
        }
    }
}

fn validate_page_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|err| anyhow!("invalid video URL '{}': {}", raw, err))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!(
            "unsupported video URL scheme '{}'; expected http or https",
            url.scheme()
        ));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingResolver;

    impl UrlResolver for FailingResolver {
        fn resolve(&self, page_url: &Url) -> Result<String> {
            Err(anyhow!("video {} is private", page_url))
        }
    }

    fn config(url: &str) -> RemoteConfig {
        RemoteConfig {
            url: url.to_string(),
            target_fps: 10,
            width: 32,
            height: 32,
            read_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn unresolvable_url_is_unavailable() -> PipelineResult<()> {
        let mut source = RemoteVideoSource::new(
            config("https://www.youtube.com/watch?v=abc"),
            Box::new(FailingResolver),
        )?;
        let err = source.open().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SourceUnavailable {
                kind: SourceKind::RemoteVideo,
                ..
            }
        ));
        assert!(err.to_string().contains("private"));
        Ok(())
    }

    #[test]
    fn rejects_non_http_urls() {
        let result = RemoteVideoSource::new(config("ftp://host/video"), Box::new(FailingResolver));
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn stub_remote_streams_frames() -> PipelineResult<()> {
        let mut source = RemoteVideoSource::new(config("stub://lecture"), Box::new(FailingResolver))?;
        source.open()?;
        assert_eq!(source.next_frame()?.map(|f| f.index), Some(1));
        assert_eq!(source.next_frame()?.map(|f| f.index), Some(2));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn command_resolver_reads_first_stdout_line() -> Result<()> {
        let resolver = CommandResolver::new("echo", Vec::new(), Duration::from_secs(5));
        let url = Url::parse("https://videos.example/watch?v=1")?;
        assert_eq!(resolver.resolve(&url)?, "https://videos.example/watch?v=1");
        Ok(())
    }

    #[test]
    fn missing_resolver_program_fails() -> Result<()> {
        let resolver =
            CommandResolver::new("cellscan-no-such-resolver", Vec::new(), Duration::from_secs(1));
        let url = Url::parse("https://videos.example/watch?v=1")?;
        assert!(resolver.resolve(&url).is_err());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn hung_resolver_is_killed_and_reported_unavailable() -> PipelineResult<()> {
        let resolver = CommandResolver::new(
            "sleep",
            vec!["5".to_string()],
            Duration::from_millis(200),
        );
        let mut source = RemoteVideoSource::new(
            config("https://www.youtube.com/watch?v=abc"),
            Box::new(resolver),
        )?;

        let started = Instant::now();
        let err = source.open().unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(
            err,
            PipelineError::SourceUnavailable {
                kind: SourceKind::RemoteVideo,
                ..
            }
        ));
        assert!(err.to_string().contains("did not finish"));
        assert!(!source.is_healthy());
        Ok(())
    }
}
