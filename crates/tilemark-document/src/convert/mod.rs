// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Conversion cascade: any input -> a paginated document.
//
// Detect, then pass paginated inputs through, try a structure-preserving
// conversion for word-processor inputs, fall back to text extraction, and
// finally synthesise a placeholder. Every stage failure is absorbed and
// recorded; `convert` always returns a result carrying a document.

pub mod extract;
pub mod fallback;
pub mod native;
pub mod state;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tilemark_assets::AssetResolver;
use tilemark_assets::builtin::DOCX_CONVERTER;
use tilemark_core::config::PipelineConfig;
use tilemark_core::error::{Result, TilemarkError};
use tilemark_core::types::{
    ConversionMethod, ConversionResult, ConversionState, DocumentFormat, ElementKind, InputFile,
    PaginatedDocument,
};
use tracing::{debug, info, instrument, warn};

use crate::detect::{FormatDetector, SignatureDetector};
use crate::pdf::reader::PdfReader;
use crate::pdf::writer::PdfWriter;
use crate::raster::RasterPage;

pub use extract::{ExtractionTier, Extracted, Variant, extract};
pub use fallback::{PlaceholderInfo, synthesize_placeholder};
pub use native::{DocxLayoutConverter, NativeConverter, NativeOutput, run_native};
pub use state::{ConversionEvent, method_for, transition};

/// What a successful stage hands back.
struct StageOutput {
    document: PaginatedDocument,
    preserved: Vec<ElementKind>,
    lost: Vec<ElementKind>,
    warnings: Vec<String>,
}

pub struct ConversionPipeline {
    detector: Arc<dyn FormatDetector>,
    converters: Vec<Arc<dyn NativeConverter>>,
    resolver: Option<AssetResolver>,
    config: PipelineConfig,
}

impl ConversionPipeline {
    /// Signature detection and the DOCX layout converter.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            detector: Arc::new(SignatureDetector),
            converters: vec![Arc::new(DocxLayoutConverter)],
            resolver: None,
            config,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn FormatDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Replace the native converters; the first that supports a format wins.
    pub fn with_converters(mut self, converters: Vec<Arc<dyn NativeConverter>>) -> Self {
        self.converters = converters;
        self
    }

    /// Gate native conversion on the `docx-converter` capability.
    pub fn with_resolver(mut self, resolver: AssetResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[instrument(skip_all, fields(file = %input.name, bytes = input.bytes.len()))]
    pub async fn convert(&self, input: &InputFile) -> ConversionResult {
        let started = Instant::now();
        let detection = self.detector.detect(&input.bytes, Some(&input.name));
        let format = detection.format;
        let mut warnings = detection.warnings;
        let mut errors = Vec::new();

        let mut state = transition(
            ConversionState::Detect,
            ConversionEvent::Detected {
                paginated: format == DocumentFormat::Pdf || format.is_raster(),
                native_eligible: format.is_word_processor() && self.config.preserve_format,
            },
        );
        let mut transitions = vec![ConversionState::Detect];
        let mut produced: Option<(ConversionState, StageOutput)> = None;

        while state != ConversionState::Done {
            transitions.push(state);
            let outcome = match state {
                ConversionState::Passthrough => self.passthrough(input, format),
                ConversionState::NativeAttempt => self.native(input, format).await,
                ConversionState::ExtractionAttempt => self.extraction(input, format),
                ConversionState::FallbackSynthesis => Ok(self.fallback(input, format)),
                ConversionState::Detect | ConversionState::Done => Err(TilemarkError::ConversionDegraded(
                    format!("no stage for {state:?}"),
                )),
            };

            let event = match outcome {
                Ok(output) => {
                    produced = Some((state, output));
                    ConversionEvent::Succeeded
                }
                Err(err) => {
                    warn!(stage = ?state, error = %err, "conversion stage degraded");
                    match &err {
                        TilemarkError::ExtractionFailed(_) => {
                            let fingerprint = self.detector.detect(&input.bytes, None);
                            warnings.push(format!(
                                "extraction failed; content fingerprint {:?} (confidence {:.2})",
                                fingerprint.format, fingerprint.confidence
                            ));
                            errors.push(err.to_string());
                        }
                        _ => warnings.push(format!("{state:?} degraded: {err}")),
                    }
                    ConversionEvent::Degraded
                }
            };
            state = transition(state, event);
        }
        transitions.push(ConversionState::Done);

        let elapsed = started.elapsed();
        match produced {
            Some((stage, output)) => {
                let method = method_for(stage);
                warnings.extend(output.warnings);
                info!(
                    ?method,
                    pages = output.document.page_count(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "conversion finished"
                );
                ConversionResult {
                    success: true,
                    method,
                    document: Some(output.document),
                    preserved: if method == ConversionMethod::Native {
                        output.preserved
                    } else {
                        Vec::new()
                    },
                    lost: output.lost,
                    file_format: format,
                    elapsed,
                    warnings,
                    errors,
                    transitions,
                }
            }
            None => ConversionResult {
                success: false,
                method: ConversionMethod::Fallback,
                document: None,
                preserved: Vec::new(),
                lost: Vec::new(),
                file_format: format,
                elapsed,
                warnings,
                errors,
                transitions,
            },
        }
    }

    fn passthrough(&self, input: &InputFile, format: DocumentFormat) -> Result<StageOutput> {
        if format == DocumentFormat::Pdf {
            let reader = PdfReader::from_bytes(&input.bytes)?;
            let page_count = reader.page_count();
            if page_count == 0 {
                return Err(TilemarkError::PdfError("document has no pages".into()));
            }
            return Ok(StageOutput {
                document: PaginatedDocument::Pdf {
                    bytes: input.bytes.clone(),
                    page_count,
                },
                preserved: vec![
                    ElementKind::Pages,
                    ElementKind::Text,
                    ElementKind::Images,
                    ElementKind::Vector,
                ],
                lost: Vec::new(),
                warnings: Vec::new(),
            });
        }

        let page = RasterPage::from_bytes(&input.bytes)?;
        Ok(StageOutput {
            document: PaginatedDocument::Raster {
                bytes: input.bytes.clone(),
                format: page.format(),
                width: page.width(),
                height: page.height(),
            },
            preserved: vec![ElementKind::Pixels],
            lost: Vec::new(),
            warnings: Vec::new(),
        })
    }

    async fn native(&self, input: &InputFile, format: DocumentFormat) -> Result<StageOutput> {
        let Some(converter) = self.converters.iter().find(|c| c.supports(format)).cloned() else {
            return Err(TilemarkError::ConversionDegraded(format!(
                "no native converter for {format:?}"
            )));
        };
        if let Some(resolver) = &self.resolver {
            resolver
                .require(DOCX_CONVERTER)
                .await
                .map_err(|e| TilemarkError::ConversionDegraded(e.to_string()))?;
        }

        debug!(converter = converter.name(), "native attempt");
        let output = run_native(
            converter,
            Arc::from(input.bytes.as_slice()),
            self.config.paper_size,
            self.config.native_timeout(),
        )
        .await?;
        Ok(StageOutput {
            document: PaginatedDocument::Pdf {
                bytes: output.pdf,
                page_count: output.page_count,
            },
            preserved: output.preserved,
            lost: output.lost,
            warnings: output.warnings,
        })
    }

    fn extraction(&self, input: &InputFile, format: DocumentFormat) -> Result<StageOutput> {
        let extracted = extract(&input.bytes, format)?;
        let mut warnings = Vec::new();
        if let Some(variant) = extracted.variant {
            warnings.push(format!("text recovered from a damaged container ({variant})"));
        }
        let mut writer = PdfWriter::new(self.config.paper_size);
        writer.set_title(input.name.clone());
        let written = writer.create_from_text(&extracted.text);
        Ok(StageOutput {
            document: PaginatedDocument::Pdf {
                bytes: written.bytes,
                page_count: written.page_count,
            },
            preserved: Vec::new(),
            lost: vec![
                ElementKind::Layout,
                ElementKind::Headings,
                ElementKind::Tables,
                ElementKind::Images,
            ],
            warnings,
        })
    }

    fn fallback(&self, input: &InputFile, format: DocumentFormat) -> StageOutput {
        let info = PlaceholderInfo {
            filename: &input.name,
            size_bytes: input.bytes.len(),
            format,
            generated_at: Utc::now(),
        };
        let written = synthesize_placeholder(&info, self.config.paper_size);
        StageOutput {
            document: PaginatedDocument::Pdf {
                bytes: written.bytes,
                page_count: written.page_count,
            },
            preserved: Vec::new(),
            lost: vec![ElementKind::Text, ElementKind::Layout, ElementKind::Images],
            warnings: vec!["content unreadable; placeholder page synthesised".into()],
        }
    }
}
