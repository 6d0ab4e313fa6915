// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Conversion cascade transition table.
//
// Kept free of I/O so every edge can be tested directly. The pipeline
// drives it: run the stage for the current state, feed the outcome back in
// as an event, repeat until `Done`.

use tilemark_core::types::{ConversionMethod, ConversionState};

/// What a stage reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionEvent {
    /// Detection finished.
    Detected {
        /// Already paginated (PDF or raster).
        paginated: bool,
        /// Word-processor input with format preservation requested.
        native_eligible: bool,
    },
    /// The stage produced a document.
    Succeeded,
    /// The stage failed or timed out; move down the cascade.
    Degraded,
}

/// Next state for `state` given `event`.
pub fn transition(state: ConversionState, event: ConversionEvent) -> ConversionState {
    use ConversionEvent::*;
    use ConversionState::*;

    match (state, event) {
        (Detect, Detected { paginated: true, .. }) => Passthrough,
        (Detect, Detected { native_eligible: true, .. }) => NativeAttempt,
        (Detect, _) => ExtractionAttempt,

        (Passthrough | NativeAttempt | ExtractionAttempt, Succeeded) => Done,
        // A paginated input that fails to load is treated like any other
        // damaged container.
        (Passthrough | NativeAttempt, Degraded) => ExtractionAttempt,
        (ExtractionAttempt, Degraded) => FallbackSynthesis,
        (Passthrough | NativeAttempt | ExtractionAttempt, Detected { .. }) => state,

        (FallbackSynthesis, _) => Done,
        (Done, _) => Done,
    }
}

/// Method reported when `state` is the stage that produced the output.
pub fn method_for(state: ConversionState) -> ConversionMethod {
    match state {
        ConversionState::Detect | ConversionState::Passthrough | ConversionState::NativeAttempt => {
            ConversionMethod::Native
        }
        ConversionState::ExtractionAttempt => ConversionMethod::Extraction,
        ConversionState::FallbackSynthesis | ConversionState::Done => ConversionMethod::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConversionEvent::*;
    use ConversionState::*;

    const DETECTED_DOCX: ConversionEvent = Detected {
        paginated: false,
        native_eligible: true,
    };
    const DETECTED_TEXT: ConversionEvent = Detected {
        paginated: false,
        native_eligible: false,
    };
    const DETECTED_PDF: ConversionEvent = Detected {
        paginated: true,
        native_eligible: false,
    };

    #[test]
    fn transition_table() {
        let table = [
            (Detect, DETECTED_PDF, Passthrough),
            (Detect, DETECTED_DOCX, NativeAttempt),
            (Detect, DETECTED_TEXT, ExtractionAttempt),
            (Detect, Degraded, ExtractionAttempt),
            (Passthrough, Succeeded, Done),
            (Passthrough, Degraded, ExtractionAttempt),
            (NativeAttempt, Succeeded, Done),
            (NativeAttempt, Degraded, ExtractionAttempt),
            (ExtractionAttempt, Succeeded, Done),
            (ExtractionAttempt, Degraded, FallbackSynthesis),
            (FallbackSynthesis, Succeeded, Done),
            (FallbackSynthesis, Degraded, Done),
            (Done, Degraded, Done),
        ];
        for (from, event, to) in table {
            assert_eq!(transition(from, event), to, "{from:?} + {event:?}");
        }
    }

    #[test]
    fn native_is_never_retried() {
        let mut state = transition(Detect, DETECTED_DOCX);
        let mut visited = vec![state];
        while state != Done {
            state = transition(state, Degraded);
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![NativeAttempt, ExtractionAttempt, FallbackSynthesis, Done]
        );
    }

    #[test]
    fn methods() {
        assert_eq!(method_for(Passthrough), ConversionMethod::Native);
        assert_eq!(method_for(NativeAttempt), ConversionMethod::Native);
        assert_eq!(method_for(ExtractionAttempt), ConversionMethod::Extraction);
        assert_eq!(method_for(FallbackSynthesis), ConversionMethod::Fallback);
    }
}
