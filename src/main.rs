use anyhow::Context;
use clap::{ArgAction, Parser};
use docshot::request::{SelectorInput, ViewportOptions};
use docshot::{output, Browser, BrowserConfig, CaptureOptions, CaptureRequest, ImageFormat, SelectorMode, SplitMode};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "docshot")]
#[command(version, about = "Capture web pages and page fragments as images")]
struct Cli {
    /// URLs or local HTML files to capture
    #[arg(required = true, value_name = "INPUT")]
    inputs: Vec<String>,

    /// Directory the images are written to
    #[arg(long, short = 'o', default_value = "shots", value_name = "DIR")]
    out_dir: PathBuf,

    /// JSON file with capture options; flags override its fields
    #[arg(long, value_name = "FILE")]
    options: Option<PathBuf>,

    /// CSS selector to capture (repeat to build a selector list)
    #[arg(long = "selector", short = 's', value_name = "CSS")]
    selectors: Vec<String>,

    /// How selector matches are captured (first, each, union, stitch)
    #[arg(long, short = 'm', value_name = "MODE")]
    mode: Option<SelectorMode>,

    /// Slicing of tall captures (auto, true, false)
    #[arg(long, value_name = "SPLIT")]
    split: Option<SplitMode>,

    /// Maximum slice height in device pixels
    #[arg(long, value_name = "PX")]
    split_max_pixel_height: Option<u32>,

    /// Overlap between consecutive slices in CSS pixels
    #[arg(long, value_name = "PX")]
    split_overlap: Option<f64>,

    /// Capture only the visible viewport
    #[arg(long, action = ArgAction::SetTrue)]
    viewport_only: bool,

    /// Maximum output width in device pixels (0 disables)
    #[arg(long, value_name = "PX")]
    max_pixel_width: Option<u32>,

    /// Image format (png, jpeg, webp)
    #[arg(long, short = 'f', value_name = "FORMAT")]
    format: Option<ImageFormat>,

    /// JPEG/WebP quality, 0-100
    #[arg(long, short = 'q')]
    quality: Option<u32>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Device scale factor
    #[arg(long)]
    scale: Option<f64>,

    /// Padding around selector captures in CSS pixels
    #[arg(long)]
    padding: Option<f64>,

    /// Gap between stitched elements in CSS pixels
    #[arg(long)]
    gap: Option<f64>,

    /// Transparent background where the page has none
    #[arg(long, action = ArgAction::SetTrue)]
    omit_background: bool,

    /// Scroll through the page before capturing to trigger lazy content
    #[arg(long, action = ArgAction::SetTrue)]
    scroll_to_load: bool,

    /// Chrome/Chromium binary to launch
    #[arg(long, value_name = "PATH")]
    chrome: Option<PathBuf>,

    /// Disable Chrome's sandbox
    #[arg(long, action = ArgAction::SetTrue)]
    no_sandbox: bool,

    /// Number of pages captured at once (defaults to the CPU count)
    #[arg(long, short = 'j')]
    concurrency: Option<usize>,
}

impl Cli {
    fn capture_options(&self) -> anyhow::Result<CaptureOptions> {
        let base = match &self.options {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading options from {}", path.display()))?;
                CaptureOptions::from_json(&text)?
            }
            None => CaptureOptions::default(),
        };

        let selector = match self.selectors.len() {
            0 => None,
            1 => Some(SelectorInput::One(self.selectors[0].clone())),
            _ => Some(SelectorInput::Many(self.selectors.clone())),
        };
        let viewport = if self.width.is_some() || self.height.is_some() || self.scale.is_some() {
            let mut v = base.viewport.unwrap_or_default();
            v.width = self.width.or(v.width);
            v.height = self.height.or(v.height);
            v.device_scale_factor = self.scale.or(v.device_scale_factor);
            Some(v)
        } else {
            None::<ViewportOptions>
        };

        let flags = CaptureOptions {
            format: self.format,
            quality: self.quality,
            full_page: self.viewport_only.then_some(false),
            selector,
            selector_mode: self.mode,
            selector_padding: self.padding,
            selector_gap: self.gap,
            split: self.split,
            split_max_pixel_height: self.split_max_pixel_height,
            split_overlap_px: self.split_overlap,
            max_pixel_width: self.max_pixel_width,
            viewport,
            omit_background: self.omit_background.then_some(true),
            scroll_to_load: self
                .scroll_to_load
                .then_some(docshot::request::ScrollToLoadOptions::Toggle(true)),
            ..Default::default()
        };
        Ok(base.merge(flags))
    }
}

/// Resolve an input argument to a navigable URL
fn input_url(input: &str) -> anyhow::Result<String> {
    if let Ok(parsed) = url::Url::parse(input) {
        if parsed.scheme().len() > 1 {
            return Ok(parsed.into());
        }
    }
    let path = std::fs::canonicalize(input).with_context(|| format!("no such file: {}", input))?;
    let file_url =
        url::Url::from_file_path(&path).map_err(|_| anyhow::anyhow!("cannot turn {} into a URL", path.display()))?;
    Ok(file_url.into())
}

/// File stem for an input, unique across the run
fn output_stem(input: &str, index: usize) -> String {
    let raw = match url::Url::parse(input) {
        Ok(u) if u.scheme().len() > 1 && u.scheme() != "file" => {
            format!("{}{}", u.host_str().unwrap_or("page"), u.path())
        }
        _ => Path::new(input)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page".to_string()),
    };
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        format!("page-{}", index + 1)
    } else {
        format!("{}-{}", cleaned, index + 1)
    }
}

async fn capture_one(
    browser: &Browser,
    request: &CaptureRequest,
    out_dir: &Path,
    index: usize,
    input: &str,
) -> anyhow::Result<Vec<PathBuf>> {
    let url = input_url(input)?;
    let page = browser.new_page().await?;

    let outcome = async {
        page.goto(&url).await?;
        page.capture(request.clone()).await
    }
    .await;
    if let Err(e) = page.close().await {
        log::warn!("Failed to close page for {}: {}", input, e);
    }
    let result = outcome.with_context(|| format!("capturing {}", input))?;

    let base = out_dir.join(output_stem(input, index));
    let paths = output::write_parts(&base, request.format, result.buffers())?;
    Ok(paths)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let request = CaptureRequest::from_options(cli.capture_options()?)?;

    let config = BrowserConfig {
        viewport: request.viewport,
        chrome_path: cli.chrome.clone(),
        sandbox: !cli.no_sandbox,
        ..Default::default()
    };
    let browser = Browser::new(Some(config)).await?;

    let concurrency = cli.concurrency.unwrap_or_else(num_cpus::get).max(1);
    log::info!("Capturing {} input(s), {} at a time", cli.inputs.len(), concurrency);

    let results: Vec<(String, anyhow::Result<Vec<PathBuf>>)> = stream::iter(cli.inputs.iter().enumerate())
        .map(|(index, input)| {
            let browser = &browser;
            let request = &request;
            let out_dir = cli.out_dir.as_path();
            async move {
                let res = capture_one(browser, request, out_dir, index, input).await;
                (input.clone(), res)
            }
        })
        .buffered(concurrency)
        .collect()
        .await;

    let mut failed = 0;
    for (input, res) in results {
        match res {
            Ok(paths) => {
                for path in paths {
                    println!("{}", path.display());
                }
            }
            Err(e) => {
                failed += 1;
                log::error!("{}: {:#}", input, e);
            }
        }
    }

    if failed > 0 {
        return Err(anyhow::anyhow!("{} of {} capture(s) failed", failed, cli.inputs.len()));
    }
    Ok(())
}
