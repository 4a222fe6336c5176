use std::collections::HashMap;

use tracing::{info, warn};

use crate::{
    citation::{CitationEnhancer, CITATION_ENHANCEMENT_FAILED},
    flows::Flows,
    types::{Precedent, StructuredLegalInfo},
};

/// Turns free-form assistant output into laws, precedents and a checklist,
/// then upgrades precedent citations through the batch enhancer.
#[derive(Clone)]
pub struct StructuredInfoParser {
    flows: Flows,
    enhancer: CitationEnhancer,
}

impl StructuredInfoParser {
    pub fn new(flows: Flows, enhancer: CitationEnhancer) -> Self {
        Self { flows, enhancer }
    }

    /// Never fails: a vacuous input, an absent model answer, or a failed
    /// extraction call all yield an empty structure.
    pub async fn parse(&self, raw_text: &str) -> StructuredLegalInfo {
        if raw_text.trim().is_empty() {
            return StructuredLegalInfo::default();
        }

        let mut info = match self.flows.parse_structured_legal_info(raw_text).await {
            Ok(Some(info)) => info,
            Ok(None) => StructuredLegalInfo::default(),
            Err(e) => {
                warn!("structured info extraction failed: {e:#}");
                StructuredLegalInfo::default()
            }
        };

        if !info.precedents.is_empty() {
            let case_names: Vec<String> =
                info.precedents.iter().map(|p| p.case_name.clone()).collect();
            let citations = self.enhancer.enhance(&case_names).await;
            let patched = apply_enhanced_citations(&mut info.precedents, &citations);
            info!(
                precedents = info.precedents.len(),
                patched, "applied enhanced citations"
            );
        }

        info
    }
}

/// Replace each precedent's citation with its enhanced value, unless the
/// lookup is missing or failed. Returns how many citations were replaced.
pub fn apply_enhanced_citations(
    precedents: &mut [Precedent],
    citations: &HashMap<String, String>,
) -> usize {
    let mut patched = 0;
    for precedent in precedents.iter_mut() {
        match citations.get(&precedent.case_name) {
            Some(c) if !c.is_empty() && c != CITATION_ENHANCEMENT_FAILED => {
                precedent.citation = c.clone();
                patched += 1;
            }
            _ => {}
        }
    }
    patched
}
