use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

use telemetry_overlay::settings::{self, ValueSelection};
use telemetry_overlay::{Anchor, Emit, FontRole, RenderOutput, TelemetryOverlay, WatermarkSpec};

#[derive(Parser, Debug)]
#[command(
    name = "telemetry-overlay",
    version,
    about = "Burn image telemetry (altitude, date, camera) into the image"
)]
struct Cli {
    /// Source image
    input: PathBuf,

    /// Where the text block goes (top-left, top-center, ..., bottom-right)
    #[arg(short = 'a', long = "anchor")]
    anchor: Option<String>,

    /// Output file (default: <stem>-overlay-<anchor>.<ext> next to the input)
    #[arg(short = 'o', long = "output", conflicts_with_all = ["overwrite", "suffix", "stdout"])]
    output: Option<PathBuf>,

    /// Overwrite the input image
    #[arg(long = "overwrite", conflicts_with_all = ["suffix", "stdout"])]
    overwrite: bool,

    /// Write next to the input as <stem><SUFFIX>.<ext>
    #[arg(long = "suffix", conflicts_with = "stdout")]
    suffix: Option<String>,

    /// Metadata key to show as KEY or KEY=LABEL (repeatable; replaces [[values]])
    #[arg(short = 'v', long = "value")]
    values: Vec<String>,

    /// Watermark image drawn at the watermark anchor
    #[arg(short = 'w', long = "watermark")]
    watermark: Option<PathBuf>,

    /// Write the encoded JPEG to stdout
    #[arg(long = "stdout")]
    stdout: bool,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry_overlay::logging::init(cli.verbose)?;

    let settings = settings::load_settings(cli.read_settings.as_deref())?;
    let anchor = cli
        .anchor
        .as_deref()
        .map(|value| value.parse::<Anchor>().unwrap_or_default())
        .unwrap_or(settings.anchor);

    let selections = if cli.values.is_empty() {
        settings.values.clone()
    } else {
        cli.values
            .iter()
            .map(|value| ValueSelection::parse(value))
            .collect::<Result<Vec<_>>>()?
    };

    let mut job = TelemetryOverlay::new(&cli.input)
        .font(FontRole::Big, settings.font(FontRole::Big).clone())
        .font(FontRole::Small, settings.font(FontRole::Small).clone());

    let watermark = match (cli.watermark, settings.watermark.clone()) {
        (Some(path), Some(mut spec)) => {
            spec.path = path;
            Some(spec)
        }
        (Some(path), None) => Some(WatermarkSpec::new(path)),
        (None, spec) => spec,
    };
    if let Some(spec) = watermark {
        job = job.watermark(spec);
    }

    if let Some(output) = cli.output {
        job = job.output(output);
    } else if cli.overwrite {
        job = job.overwrite();
    } else if let Some(suffix) = cli.suffix.as_deref().or(settings.output_suffix.as_deref()) {
        job = job.output_suffix(suffix);
    }

    let extractor = settings.extractor.build();
    if !job.prepare(extractor.as_ref()) {
        bail!(
            "no metadata found in {} (extractor: {})",
            cli.input.display(),
            settings.extractor
        );
    }
    for selection in &selections {
        job.add_value(&selection.key, selection.label.as_deref())?;
    }

    let emit = cli.stdout.then_some(Emit::Stdout);
    if let RenderOutput::Written { path, .. } = job.render(anchor, &settings.layout, emit)? {
        println!("{}", path.display());
    }
    Ok(())
}
