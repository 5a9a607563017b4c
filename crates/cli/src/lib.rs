use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use doc_model::{EmbedPolicy, InkPreferences, Rect, RenderTransform};
use image::{Rgba, RgbaImage};
use ink_sync::{embed, render, snapshot_size, DocumentSession, FootprintRasterizer, PageCanvas};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use storage::PreferenceStore;
use tracing::{info, warn};

/// Overrides the preference directory, mainly for tests.
const DATA_DIR_ENV: &str = "BUTTERPAPER_INK_DATA_DIR";

#[derive(Debug, Parser)]
#[command(name = "butterpaper-ink")]
#[command(about = "Sync freehand PDF drawings with their interchange files")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable page and drawing metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Write the interchange file for the drawings embedded in a PDF.
    Export {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Defaults to the PDF's sidecar path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replace drawings from an interchange file and save the PDF.
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Defaults to the PDF's sidecar path.
        #[arg(long)]
        sidecar: Option<PathBuf>,
        /// Flatten drawings into the page content instead of embedding them.
        #[arg(long)]
        burn_in: bool,
        /// Do not rewrite the sidecar after saving.
        #[arg(long)]
        no_interchange: bool,
    },
    /// Write a copy with every drawing burned into its page.
    Flatten {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Render a page's drawing to a PNG.
    Preview {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Show the stored preferences, changing any that are given.
    Config {
        #[arg(long, value_enum)]
        embed_policy: Option<PolicyArg>,
        #[arg(long, value_name = "BOOL")]
        import_on_open: Option<bool>,
        #[arg(long, value_name = "BOOL")]
        write_interchange: Option<bool>,
        #[arg(long, value_name = "EXT")]
        sidecar_extension: Option<String>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Editable,
    BurnIn,
}

impl From<PolicyArg> for EmbedPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Editable => Self::Editable,
            PolicyArg::BurnIn => Self::BurnIn,
        }
    }
}

#[derive(Debug, Default)]
struct PreferenceChanges {
    embed_policy: Option<EmbedPolicy>,
    import_on_open: Option<bool>,
    write_interchange: Option<bool>,
    sidecar_extension: Option<String>,
}

impl PreferenceChanges {
    fn is_empty(&self) -> bool {
        self.embed_policy.is_none()
            && self.import_on_open.is_none()
            && self.write_interchange.is_none()
            && self.sidecar_extension.is_none()
    }

    fn apply(self, preferences: &mut InkPreferences) -> Result<()> {
        if let Some(extension) = self.sidecar_extension {
            let extension = extension.trim_start_matches('.');
            let unusable = extension.is_empty() || extension.contains(['/', '\\']);
            if unusable || extension.eq_ignore_ascii_case("pdf") {
                anyhow::bail!("invalid sidecar extension: {extension:?}");
            }
            preferences.sidecar_extension = extension.to_owned();
        }
        if let Some(policy) = self.embed_policy {
            preferences.embed_policy = policy;
        }
        if let Some(import) = self.import_on_open {
            preferences.import_sidecar_on_open = import;
        }
        if let Some(write) = self.write_interchange {
            preferences.write_interchange = write;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    pages: Vec<PageOutput>,
}

#[derive(Debug, Serialize)]
struct PageOutput {
    index: u32,
    width: f32,
    height: f32,
    crop_box: BoxOutput,
    drawing_annotations: usize,
    strokes: usize,
}

#[derive(Debug, Serialize)]
struct BoxOutput {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl From<Rect> for BoxOutput {
    fn from(rect: Rect) -> Self {
        Self { x: rect.x, y: rect.y, width: rect.width, height: rect.height }
    }
}

#[derive(Debug, Serialize)]
struct ConfigOutput {
    path: String,
    preferences: InkPreferences,
}

#[derive(Debug, Serialize)]
struct ImportOutput {
    records_imported: usize,
    strokes_imported: usize,
    skipped: Vec<String>,
    pages_replaced: Vec<u32>,
    annotations_removed: usize,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    if let Commands::Version = cli.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let store = preference_store();

        let command = match cli.command {
            Commands::Config { embed_policy, import_on_open, write_interchange, sidecar_extension } => {
                let changes = PreferenceChanges {
                    embed_policy: embed_policy.map(EmbedPolicy::from),
                    import_on_open,
                    write_interchange,
                    sidecar_extension,
                };
                return run_config(&store?, changes).await;
            }
            command => command,
        };

        let preferences = load_preferences(store).await;
        match command {
            Commands::Info { file } => run_info(&file, preferences).await,
            Commands::Export { file, output } => run_export(&file, output, preferences).await,
            Commands::Import { file, sidecar, burn_in, no_interchange } => {
                run_import(&file, sidecar, burn_in, no_interchange, preferences).await
            }
            Commands::Flatten { file, output } => run_flatten(&file, &output, preferences).await,
            Commands::Preview { file, page, scale, output } => {
                run_preview(&file, page, scale, output.as_deref(), preferences).await
            }
            Commands::Config { .. } | Commands::Version => Ok(()),
        }
    })
}

fn preference_store() -> Result<PreferenceStore, storage::StorageError> {
    PreferenceStore::locate(std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
}

/// Document commands still run with defaults when the preference file is unusable.
async fn load_preferences(store: Result<PreferenceStore, storage::StorageError>) -> InkPreferences {
    let loaded = match store {
        Ok(store) => store.load().await,
        Err(err) => Err(err),
    };

    loaded.unwrap_or_else(|err| {
        warn!(%err, "using default preferences");
        InkPreferences::default()
    })
}

async fn run_config(store: &PreferenceStore, changes: PreferenceChanges) -> Result<()> {
    let mut preferences = store
        .load()
        .await
        .with_context(|| format!("failed to read {}", store.path().display()))?;

    if !changes.is_empty() {
        changes.apply(&mut preferences)?;
        store
            .save(&preferences)
            .await
            .with_context(|| format!("failed to write {}", store.path().display()))?;
        info!(path = %store.path().display(), "updated preferences");
    }

    let payload = ConfigOutput { path: store.path().display().to_string(), preferences };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

/// The document as stored in the PDF itself, without the sidecar.
async fn open_embedded(file: &Path, preferences: InkPreferences) -> Result<DocumentSession> {
    ensure_pdf_exists(file)?;
    let preferences = InkPreferences { import_sidecar_on_open: false, ..preferences };
    DocumentSession::open(file, preferences).await.context("failed to open PDF")
}

async fn run_info(file: &Path, preferences: InkPreferences) -> Result<()> {
    let session = open_embedded(file, preferences).await?;

    let mut pages = Vec::new();
    for page in session.pages() {
        let page = page.borrow();
        let bounds = page.bounds();
        pages.push(PageOutput {
            index: page.index(),
            width: bounds.width,
            height: bounds.height,
            crop_box: session.crop_box(page.index())?.into(),
            drawing_annotations: session.embedded_drawing_count(page.index())?,
            strokes: page.drawing.len(),
        });
    }

    let payload =
        InfoOutput { path: file.display().to_string(), page_count: session.page_count(), pages };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    session.close()?;
    Ok(())
}

async fn run_export(file: &Path, output: Option<PathBuf>, preferences: InkPreferences) -> Result<()> {
    let session = open_embedded(file, preferences).await?;
    let output = output.unwrap_or_else(|| session.sidecar_path());

    session.export_interchange(&output).await?;
    println!("{}", output.display());

    session.close()?;
    Ok(())
}

async fn run_import(
    file: &Path,
    sidecar: Option<PathBuf>,
    burn_in: bool,
    no_interchange: bool,
    preferences: InkPreferences,
) -> Result<()> {
    let preferences = InkPreferences {
        write_interchange: preferences.write_interchange && !no_interchange,
        ..preferences
    };
    let session = open_embedded(file, preferences).await?;
    let sidecar = sidecar.unwrap_or_else(|| session.sidecar_path());

    let report = session
        .import_interchange(&sidecar)
        .await
        .with_context(|| format!("failed to import {}", sidecar.display()))?;

    let policy = if burn_in { EmbedPolicy::BurnIn } else { session.preferences().embed_policy };
    session.save_with_policy(policy).await?;

    let payload = ImportOutput {
        records_imported: report.decode.records_imported,
        strokes_imported: report.decode.strokes_imported,
        skipped: report.decode.skipped.iter().map(ToString::to_string).collect(),
        pages_replaced: report.reconcile.pages_replaced.clone(),
        annotations_removed: report.reconcile.total_removed(),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    session.close()?;
    Ok(())
}

async fn run_flatten(file: &Path, output: &Path, preferences: InkPreferences) -> Result<()> {
    ensure_pdf_exists(file)?;
    let session = DocumentSession::open(file, preferences).await.context("failed to open PDF")?;

    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    session.export_to(output, EmbedPolicy::BurnIn).await?;
    println!("{}", output.display());

    session.close()?;
    Ok(())
}

async fn run_preview(
    file: &Path,
    page: u32,
    scale: f32,
    output: Option<&Path>,
    preferences: InkPreferences,
) -> Result<()> {
    ensure_pdf_exists(file)?;

    if page == 0 {
        anyhow::bail!("--page is 1-based and must be >= 1");
    }
    if !(scale.is_finite() && scale > 0.0) {
        anyhow::bail!("--scale must be a positive number");
    }

    let session = DocumentSession::open(file, preferences).await.context("failed to open PDF")?;
    let page_ref = session
        .page(page - 1)
        .with_context(|| format!("page {page} out of range (page_count={})", session.page_count()))?;

    let image = {
        let page = page_ref.borrow();
        let bounds = page.bounds();
        let (width, height) = snapshot_size(bounds.width, bounds.height, scale)
            .with_context(|| format!("--scale {scale} makes the preview too large"))?;
        let transform = RenderTransform {
            a: scale,
            d: -scale,
            tx: -bounds.x * scale,
            ty: (bounds.y + bounds.height) * scale,
            ..RenderTransform::IDENTITY
        };
        let mut canvas =
            PageCanvas::new(RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])), transform);

        if let Some(annotation) = embed(&page.drawing, &page) {
            render(&annotation, &mut canvas, &FootprintRasterizer)?;
        }
        canvas.image
    };

    let output = output.map(ToOwned::to_owned).unwrap_or_else(|| default_preview_output(file, page));
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    image
        .save(&output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;
    println!("{}", output.display());

    drop(page_ref);
    session.close()?;
    Ok(())
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn default_preview_output(file: &Path, page: u32) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("preview");

    file.with_file_name(format!("{stem}-page-{page}.png"))
}
