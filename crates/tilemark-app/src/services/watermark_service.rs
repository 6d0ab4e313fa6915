// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The watermark service: one call takes an input file and a mark spec and
// hands back a finished artifact, never an error.
//
// All subsystems are built once at startup and shared by every call. The
// resolver, renderer and pool are cheap to clone (Arc-backed) so blocking
// work can move onto tokio's blocking threads.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tilemark_assets::builtin::{
    FONT_PREFIX, PDF_CODEC, RASTER_CODEC, builtin_linker, seed_builtin_payloads,
    with_builtin_catalog,
};
use tilemark_assets::{AssetResolver, MemoryFetcher, MirrorFetcher, RoutingFetcher};
use tilemark_core::config::TilemarkConfig;
use tilemark_core::error::{Result, TilemarkError};
use tilemark_core::mark::{GridLayout, LayerStrategy, MarkContent, MarkSpec};
use tilemark_core::types::{
    ArtifactHandle, ConversionMethod, ConversionState, DocumentFormat, ElementKind, InputFile,
    PaginatedDocument,
};
use tilemark_document::{ConversionPipeline, LayerMerger, MergeMark, MergeReport};
use tilemark_render::{FontBook, MarkRenderer, PoolStats, SurfacePool, spawn_memory_sweep};
use tilemark_security::{DigestAlgorithm, Signer, SigningKey, TamperStamp, stamp};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use super::artifacts::{Artifact, ArtifactStore};
use super::progress::ProgressSender;

const TOTAL_STEPS: u32 = 7;

/// Per-call knobs on top of the service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessOptions {
    pub grid: GridLayout,
    /// Overrides `merge.strategy` from the configuration.
    pub strategy: Option<LayerStrategy>,
    /// Overrides `merge.stamp_integrity` from the configuration.
    pub stamp: Option<bool>,
}

/// Outcome of one `process_document` call.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedDocument {
    pub success: bool,
    pub name: String,
    pub artifact: Option<ArtifactHandle>,
    pub mime_type: Option<&'static str>,
    pub method: Option<ConversionMethod>,
    pub file_format: DocumentFormat,
    pub page_count: usize,
    pub preserved: Vec<ElementKind>,
    pub lost: Vec<ElementKind>,
    pub transitions: Vec<ConversionState>,
    pub merge: Option<MergeReport>,
    pub stamp: Option<TamperStamp>,
    pub elapsed: Duration,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ProcessedDocument {
    fn pending(name: &str) -> Self {
        Self {
            success: false,
            name: name.to_owned(),
            artifact: None,
            mime_type: None,
            method: None,
            file_format: DocumentFormat::Unknown,
            page_count: 0,
            preserved: Vec::new(),
            lost: Vec::new(),
            transitions: Vec::new(),
            merge: None,
            stamp: None,
            elapsed: Duration::ZERO,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }
}

struct Inner {
    config: TilemarkConfig,
    resolver: AssetResolver,
    font_assets: Vec<String>,
    renderer: MarkRenderer,
    pipeline: ConversionPipeline,
    artifacts: ArtifactStore,
    signer: Mutex<Option<Arc<dyn Signer>>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(sweep) = self.sweep.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            sweep.abort();
        }
    }
}

#[derive(Clone)]
pub struct WatermarkService {
    inner: Arc<Inner>,
}

impl WatermarkService {
    /// Start with the standard fetchers: HTTP(S), `file://`, and the
    /// embedded `mem://` capabilities.
    pub async fn start(config: TilemarkConfig) -> Result<Self> {
        let memory = Arc::new(MemoryFetcher::new());
        seed_builtin_payloads(&memory);
        let fetcher = RoutingFetcher::standard(memory)?;
        Self::with_fetcher(config, Arc::new(fetcher)).await
    }

    /// Start with a caller-supplied fetcher for every mirror.
    #[instrument(skip_all, fields(assets = config.assets.len()))]
    pub async fn with_fetcher(config: TilemarkConfig, fetcher: Arc<dyn MirrorFetcher>) -> Result<Self> {
        config.validate()?;

        let catalog = with_builtin_catalog(config.assets.clone());
        let font_assets: Vec<String> = catalog
            .iter()
            .filter(|d| d.expected_symbol.starts_with(FONT_PREFIX))
            .map(|d| d.name.clone())
            .collect();
        let resolver = AssetResolver::new(
            catalog,
            fetcher,
            Arc::new(builtin_linker()),
            config.resolver.clone(),
        );

        for outcome in resolver
            .resolve_many(font_assets.iter(), config.resolver.max_concurrent)
            .await
        {
            if !outcome.success {
                warn!(asset = %outcome.name, reason = ?outcome.reason, "font asset unavailable");
            }
        }
        let mut fonts = FontBook::new();
        for dir in &config.render.font_dirs {
            fonts.register_dir(dir);
        }
        fonts.register_bindings(&resolver.bindings_with_prefix(FONT_PREFIX));

        let pool = SurfacePool::shared(config.pool.clone());
        let sweep = spawn_memory_sweep(
            Arc::clone(&pool),
            Duration::from_millis(config.pool.sweep_interval_ms.max(1)),
        );
        let renderer = MarkRenderer::new(pool, Arc::new(fonts), config.render.clone());
        let pipeline = ConversionPipeline::new(config.pipeline.clone()).with_resolver(resolver.clone());

        let signer: Option<Arc<dyn Signer>> = if config.merge.stamp_integrity {
            match SigningKey::generate() {
                Ok(key) => Some(Arc::new(key)),
                Err(err) => {
                    warn!(error = %err, "no signing key; stamps will be skipped");
                    None
                }
            }
        } else {
            None
        };

        info!(fonts = renderer.fonts().len(), "watermark service started");
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                resolver,
                font_assets,
                renderer,
                pipeline,
                artifacts: ArtifactStore::new(),
                signer: Mutex::new(signer),
                sweep: Mutex::new(Some(sweep)),
            }),
        })
    }

    // -- Accessors -------------------------------------------------------------

    pub fn config(&self) -> &TilemarkConfig {
        &self.inner.config
    }

    pub fn resolver(&self) -> &AssetResolver {
        &self.inner.resolver
    }

    pub fn renderer(&self) -> &MarkRenderer {
        &self.inner.renderer
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.inner.artifacts
    }

    pub fn artifact(&self, handle: ArtifactHandle) -> Option<Artifact> {
        self.inner.artifacts.get(handle)
    }

    pub fn revoke(&self, handle: ArtifactHandle) -> bool {
        self.inner.artifacts.revoke(handle)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner
            .renderer
            .pool()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats()
    }

    /// Key used for tamper stamps from now on.
    pub fn set_signer(&self, signer: Arc<dyn Signer>) {
        *self.inner.signer.lock().unwrap_or_else(PoisonError::into_inner) = Some(signer);
    }

    /// Stop the background memory sweep.
    pub fn shutdown(&self) {
        if let Some(sweep) = self
            .inner
            .sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweep.abort();
            info!("watermark service stopped");
        }
    }

    // -- Processing ------------------------------------------------------------

    /// Watermark one document. Failures are reported in the result.
    #[instrument(skip_all, fields(file = %file.name, bytes = file.bytes.len()))]
    pub async fn process_document(
        &self,
        file: InputFile,
        spec: MarkSpec,
        options: ProcessOptions,
        progress: Option<ProgressSender>,
    ) -> ProcessedDocument {
        let started = Instant::now();
        let mut processed = ProcessedDocument::pending(&file.name);

        let outcome = self
            .run(&file, &spec, &options, progress.as_ref(), &mut processed)
            .await;
        processed.elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                processed.success = true;
                info!(
                    method = ?processed.method,
                    pages = processed.page_count,
                    elapsed_ms = processed.elapsed.as_millis() as u64,
                    "document processed"
                );
            }
            Err(err) => {
                error!(error = %err, "document processing failed");
                processed.errors.push(err.to_string());
            }
        }

        if let Some(progress) = &progress {
            let message = if processed.success { "done" } else { "failed" };
            progress.finish(TOTAL_STEPS, message).await;
        }
        processed
    }

    async fn run(
        &self,
        file: &InputFile,
        spec: &MarkSpec,
        options: &ProcessOptions,
        progress: Option<&ProgressSender>,
        processed: &mut ProcessedDocument,
    ) -> Result<()> {
        let step = |n: u32, message: &str| {
            if let Some(p) = progress {
                p.report(n, TOTAL_STEPS, message);
            }
        };

        step(1, "checking mark");
        spec.validate()?;

        step(2, "resolving fonts");
        for outcome in self.inner.resolver.resolve_all(self.inner.font_assets.iter()).await {
            if !outcome.success {
                processed.warnings.push(format!(
                    "font '{}' unavailable: {}",
                    outcome.name,
                    outcome.reason.unwrap_or_default()
                ));
            }
        }

        step(3, "converting");
        let mut conversion = self.inner.pipeline.convert(file).await;
        processed.method = Some(conversion.method);
        processed.file_format = conversion.file_format;
        processed.page_count = conversion.page_count();
        processed.preserved = std::mem::take(&mut conversion.preserved);
        processed.lost = std::mem::take(&mut conversion.lost);
        processed.transitions = std::mem::take(&mut conversion.transitions);
        processed.warnings.append(&mut conversion.warnings);
        processed.warnings.append(&mut conversion.errors);
        let document = match conversion.document.take() {
            Some(document) if conversion.success => document,
            _ => {
                return Err(TilemarkError::ConversionDegraded(
                    "conversion produced no paginated output".into(),
                ));
            }
        };
        let codec = match &document {
            PaginatedDocument::Pdf { .. } => PDF_CODEC,
            PaginatedDocument::Raster { .. } => RASTER_CODEC,
        };
        self.inner.resolver.require(codec).await?;

        step(4, "rendering mark");
        let renderer = self.inner.renderer.clone();
        let render_spec = spec.clone();
        let rendered = tokio::task::spawn_blocking(move || renderer.render(&render_spec))
            .await
            .map_err(|e| TilemarkError::RenderError(format!("render task failed: {e}")))??;
        let mark = MergeMark::from_rendered(&rendered, self.inner.config.render.dpi, fallback_text(spec));

        step(5, "merging");
        let mut merge_config = self.inner.config.merge.clone();
        if let Some(strategy) = options.strategy {
            merge_config.strategy = strategy;
        }
        let grid = options.grid.clone();
        let fonts = self.inner.renderer.shared_fonts();
        let merged = tokio::task::spawn_blocking(move || {
            LayerMerger::new(merge_config)
                .with_fonts(fonts)
                .merge(&document, &mark, &grid)
        })
        .await
        .map_err(|e| TilemarkError::RenderError(format!("merge task failed: {e}")))??;
        processed.page_count = merged.page_count;
        processed.warnings.extend(merged.report.warnings.iter().cloned());

        step(6, "stamping");
        if options.stamp.unwrap_or(self.inner.config.merge.stamp_integrity) {
            processed.stamp = self.stamp_artifact(&merged.bytes, &mut processed.warnings);
        }

        step(7, "storing");
        let mime_type = merged.mime_type();
        let name = output_name(&file.name, merged.format);
        processed.artifact = Some(self.inner.artifacts.insert(name, merged.bytes, mime_type));
        processed.mime_type = Some(mime_type);
        processed.merge = Some(merged.report);
        Ok(())
    }

    /// Stamp failures never fail the document.
    fn stamp_artifact(&self, bytes: &[u8], warnings: &mut Vec<String>) -> Option<TamperStamp> {
        let signer = self
            .inner
            .signer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(signer) = signer else {
            warnings.push("tamper stamp skipped: no signing key".into());
            return None;
        };
        match stamp(bytes, DigestAlgorithm::Sha256, signer.as_ref()) {
            Ok(stamp) => Some(stamp),
            Err(err) => {
                warn!(error = %err, "tamper stamp failed");
                warnings.push(format!("tamper stamp failed: {err}"));
                None
            }
        }
    }

    /// Process `files` in waves of at most `max_concurrent`. Results keep
    /// input order; one failure does not stop the rest.
    pub async fn process_batch(
        &self,
        files: Vec<InputFile>,
        spec: &MarkSpec,
        options: &ProcessOptions,
        max_concurrent: usize,
    ) -> Vec<ProcessedDocument> {
        let mut results = Vec::with_capacity(files.len());
        let mut remaining = files.into_iter();
        loop {
            let wave: Vec<InputFile> = remaining.by_ref().take(max_concurrent.max(1)).collect();
            if wave.is_empty() {
                break;
            }
            let runs = wave
                .into_iter()
                .map(|file| self.process_document(file, spec.clone(), options.clone(), None));
            results.extend(join_all(runs).await);
        }
        let failed = results.iter().filter(|r| !r.success).count();
        info!(documents = results.len(), failed, "batch processed");
        results
    }
}

fn fallback_text(spec: &MarkSpec) -> String {
    match &spec.content {
        MarkContent::Text(text) => text.clone(),
        MarkContent::Image(_) => "[mark]".into(),
    }
}

/// `report.docx` becomes `report-marked.pdf`.
pub fn output_name(input: &str, format: DocumentFormat) -> String {
    let stem = Path::new(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document");
    let extension = match format {
        DocumentFormat::Jpeg => "jpg",
        DocumentFormat::Png => "png",
        _ => "pdf",
    };
    format!("{stem}-marked.{extension}")
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tilemark_assets::builtin::builtin_mirror;
    use tilemark_core::config::RenderConfig;
    use tilemark_document::{PdfReader, PdfWriter};
    use tilemark_security::verify_stamp;

    use super::*;
    use crate::services::progress::progress_channel;

    fn config() -> TilemarkConfig {
        TilemarkConfig {
            render: RenderConfig {
                dpi: 72.0,
                ..RenderConfig::default()
            },
            ..TilemarkConfig::default()
        }
    }

    async fn service() -> WatermarkService {
        let memory = Arc::new(MemoryFetcher::new());
        seed_builtin_payloads(&memory);
        WatermarkService::with_fetcher(config(), memory).await.unwrap()
    }

    fn pdf_input() -> InputFile {
        let pdf = PdfWriter::a4().create_from_text("Quarterly figures\n\nAll regions grew.");
        InputFile::new("figures.pdf", pdf.bytes)
    }

    fn png_input() -> InputFile {
        let image = image::RgbaImage::from_pixel(400, 300, image::Rgba([255, 255, 255, 255]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(image)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        InputFile::new("scan.png", out.into_inner())
    }

    #[tokio::test]
    async fn pdf_comes_back_marked() {
        let service = service().await;
        let (tx, mut rx) = progress_channel(16);
        let processed = service
            .process_document(pdf_input(), MarkSpec::text("DRAFT"), ProcessOptions::default(), Some(tx))
            .await;

        assert!(processed.success, "{:?}", processed.errors);
        assert_eq!(processed.method, Some(ConversionMethod::Native));
        assert_eq!(processed.mime_type, Some("application/pdf"));
        let report = processed.merge.as_ref().unwrap();
        assert!(report.placements_drawn > 0);
        assert_eq!(report.substitutions, 0);

        let artifact = service.artifact(processed.artifact.unwrap()).unwrap();
        assert_eq!(artifact.name, "figures-marked.pdf");
        assert_eq!(PdfReader::from_bytes(&artifact.bytes).unwrap().page_count(), 1);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let terminal = event.terminal;
            events.push(event);
            if terminal {
                break;
            }
        }
        assert_eq!(events.len(), TOTAL_STEPS as usize + 1);
        assert_eq!(events.last().unwrap().message, "done");
        assert_eq!(service.pool_stats().in_use, 0);
    }

    #[tokio::test]
    async fn raster_stays_raster() {
        let service = service().await;
        let processed = service
            .process_document(
                png_input(),
                MarkSpec::text("COPY").with_size(18.0),
                ProcessOptions {
                    grid: GridLayout {
                        spacing_x: 100.0,
                        spacing_y: 100.0,
                        margin: 10.0,
                        ..GridLayout::default()
                    },
                    ..ProcessOptions::default()
                },
                None,
            )
            .await;
        assert!(processed.success, "{:?}", processed.errors);
        assert_eq!(processed.mime_type, Some("image/png"));
        assert_eq!(processed.preserved, vec![ElementKind::Pixels]);
        assert!(service.resolver().is_loaded(RASTER_CODEC));
    }

    #[tokio::test]
    async fn invalid_mark_fails_without_throwing() {
        let service = service().await;
        let (tx, mut rx) = progress_channel(1);
        let processed = service
            .process_document(
                pdf_input(),
                MarkSpec::text("DRAFT").with_opacity(1.5),
                ProcessOptions::default(),
                Some(tx),
            )
            .await;
        assert!(!processed.success);
        assert!(processed.errors[0].contains("opacity"));
        assert!(processed.artifact.is_none());
        assert!(service.artifacts().is_empty());

        // The step event fills the channel; the terminal one still arrives.
        let first = rx.recv().await.unwrap();
        assert!(!first.terminal);
        let last = rx.recv().await.unwrap();
        assert!(last.terminal);
        assert_eq!(last.message, "failed");
    }

    #[tokio::test]
    async fn unreadable_input_still_gets_a_marked_placeholder() {
        let service = service().await;
        let junk = InputFile::new("mystery.bin", vec![0x00, 0x9F, 0x13, 0x37, 0xFE, 0x01]);
        let processed = service
            .process_document(junk, MarkSpec::text("DRAFT"), ProcessOptions::default(), None)
            .await;
        assert!(processed.success, "{:?}", processed.errors);
        assert_eq!(processed.method, Some(ConversionMethod::Fallback));
        assert_eq!(processed.page_count, 1);
        assert!(processed.warnings.iter().any(|w| w.contains("extraction failed")));
    }

    #[tokio::test]
    async fn missing_codec_is_reported() {
        let service = WatermarkService::with_fetcher(config(), Arc::new(MemoryFetcher::new()))
            .await
            .unwrap();
        let processed = service
            .process_document(pdf_input(), MarkSpec::text("DRAFT"), ProcessOptions::default(), None)
            .await;
        assert!(!processed.success);
        assert!(processed.errors[0].contains(PDF_CODEC), "{:?}", processed.errors);
    }

    #[tokio::test]
    async fn raster_jobs_do_not_need_the_pdf_codec() {
        let memory = Arc::new(MemoryFetcher::new());
        memory.insert(builtin_mirror(RASTER_CODEC), b"tilemark builtin RasterCodec".to_vec());
        let service = WatermarkService::with_fetcher(config(), memory).await.unwrap();

        let processed = service
            .process_document(png_input(), MarkSpec::text("COPY"), ProcessOptions::default(), None)
            .await;
        assert!(processed.success, "{:?}", processed.errors);
        assert_eq!(processed.mime_type, Some("image/png"));
        assert!(!service.resolver().is_loaded(PDF_CODEC));

        // The same service still refuses PDFs.
        let processed = service
            .process_document(pdf_input(), MarkSpec::text("COPY"), ProcessOptions::default(), None)
            .await;
        assert!(!processed.success);
        assert!(processed.errors[0].contains(PDF_CODEC), "{:?}", processed.errors);
    }

    #[tokio::test]
    async fn stamps_verify_against_the_artifact() {
        let service = service().await;
        service.set_signer(Arc::new(SigningKey::generate().unwrap()));
        let processed = service
            .process_document(
                pdf_input(),
                MarkSpec::text("SIGNED"),
                ProcessOptions {
                    stamp: Some(true),
                    ..ProcessOptions::default()
                },
                None,
            )
            .await;
        assert!(processed.success, "{:?}", processed.errors);
        let artifact = service.artifact(processed.artifact.unwrap()).unwrap();
        let stamp = processed.stamp.unwrap();
        assert!(verify_stamp(&artifact.bytes, &stamp).is_ok());
    }

    #[tokio::test]
    async fn stamp_without_key_is_only_a_warning() {
        let service = service().await;
        let processed = service
            .process_document(
                pdf_input(),
                MarkSpec::text("DRAFT"),
                ProcessOptions {
                    stamp: Some(true),
                    ..ProcessOptions::default()
                },
                None,
            )
            .await;
        assert!(processed.success);
        assert!(processed.stamp.is_none());
        assert!(processed.warnings.iter().any(|w| w.contains("no signing key")));
    }

    #[tokio::test]
    async fn batch_keeps_order_and_survives_failures() {
        let service = service().await;
        let files = vec![
            pdf_input(),
            InputFile::new("notes.txt", b"Remember the milk.".to_vec()),
            InputFile::new("empty.pdf", b"%PDF-1.4 truncated".to_vec()),
        ];
        let results = service
            .process_batch(files, &MarkSpec::text("DRAFT"), &ProcessOptions::default(), 2)
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].name, "figures.pdf");
        assert_eq!(results[1].method, Some(ConversionMethod::Extraction));
        assert_eq!(results[2].method, Some(ConversionMethod::Fallback));
        assert!(results.iter().all(|r| r.success));
        assert_eq!(service.artifacts().len(), 3);

        let first = results[0].artifact.unwrap();
        assert!(service.revoke(first));
        assert_eq!(service.artifacts().len(), 2);
        service.shutdown();
    }

    #[test]
    fn output_names_follow_the_format() {
        assert_eq!(output_name("report.docx", DocumentFormat::Pdf), "report-marked.pdf");
        assert_eq!(output_name("photo.jpeg", DocumentFormat::Jpeg), "photo-marked.jpg");
        assert_eq!(output_name("", DocumentFormat::Png), "document-marked.png");
    }
}
