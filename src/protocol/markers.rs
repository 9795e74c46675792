//! Marker table for the engine's tag-delimited output.

use crate::config::MarkerConfig;

/// The tagged regions the demuxer recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Input prompt or engine question.
    Prompt,
    /// Typeset math result.
    Math,
    /// Autocompletion template list.
    SymbolTemplates,
}

/// A start/end marker pair and the event kind it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Which event the region produces.
    pub kind: RegionKind,
    /// Opening marker.
    pub start: Vec<u8>,
    /// Closing marker.
    pub end: Vec<u8>,
}

/// All markers the demuxer matches against, in byte form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerTable {
    regions: Vec<Region>,
    symbols_separator: String,
    banner_end: Vec<u8>,
    lisp_error_signatures: Vec<Vec<u8>>,
    input_prompt_prefix: String,
}

impl Default for MarkerTable {
    fn default() -> Self {
        Self::from_config(&MarkerConfig::default())
    }
}

impl MarkerTable {
    /// Build the table from configured marker strings.
    #[must_use]
    pub fn from_config(config: &MarkerConfig) -> Self {
        let region = |kind, start: &str, end: &str| Region {
            kind,
            start: start.as_bytes().to_vec(),
            end: end.as_bytes().to_vec(),
        };

        Self {
            regions: vec![
                region(RegionKind::Prompt, &config.prompt_start, &config.prompt_end),
                region(RegionKind::Math, &config.math_start, &config.math_end),
                region(
                    RegionKind::SymbolTemplates,
                    &config.symbols_start,
                    &config.symbols_end,
                ),
            ],
            symbols_separator: config.symbols_separator.clone(),
            banner_end: config.banner_end.as_bytes().to_vec(),
            lisp_error_signatures: config
                .lisp_error_signatures
                .iter()
                .map(|sig| sig.as_bytes().to_vec())
                .collect(),
            input_prompt_prefix: config.input_prompt_prefix.clone(),
        }
    }

    /// Tagged regions in table order.
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Marker that closes the startup banner.
    #[must_use]
    pub fn banner_end(&self) -> &[u8] {
        &self.banner_end
    }

    /// Index of the region whose start marker sits at the front of `buf`.
    #[must_use]
    pub fn region_at(&self, buf: &[u8]) -> Option<usize> {
        self.regions
            .iter()
            .position(|region| buf.starts_with(&region.start))
    }

    /// Offset of the earliest complete start marker in `buf`.
    #[must_use]
    pub fn next_start(&self, buf: &[u8]) -> Option<usize> {
        self.regions
            .iter()
            .filter_map(|region| find(buf, &region.start))
            .min()
    }

    /// Length of the longest suffix of `buf` that could still grow into a
    /// start marker once more bytes arrive.
    #[must_use]
    pub fn partial_start_suffix(&self, buf: &[u8]) -> usize {
        self.regions
            .iter()
            .map(|region| {
                let max = region.start.len().saturating_sub(1).min(buf.len());
                (1..=max)
                    .rev()
                    .find(|&n| region.start.starts_with(&buf[buf.len() - n..]))
                    .unwrap_or(0)
            })
            .max()
            .unwrap_or(0)
    }

    /// Whether a text segment opens with a lisp runtime error signature.
    #[must_use]
    pub fn is_lisp_error(&self, segment: &[u8]) -> bool {
        self.lisp_error_signatures
            .iter()
            .any(|sig| segment.starts_with(sig))
    }

    /// Split an autocompletion list into its templates.
    #[must_use]
    pub fn split_templates(&self, body: &str) -> Vec<String> {
        body.split(self.symbols_separator.as_str())
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Whether prompt text is an input prompt rather than an engine question.
    #[must_use]
    pub fn is_input_prompt(&self, text: &str) -> bool {
        text.trim_start().starts_with(&self.input_prompt_prefix)
    }
}

/// Offset of the first occurrence of `needle` in `haystack`.
#[must_use]
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
