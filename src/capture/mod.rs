pub mod freeze;
pub mod region;
pub mod tracker;

use crate::bridge::{DisplayInfo, SourceInfo, SourceKind};

/// Resolve which capture source currently corresponds to a display.
///
/// The platform produces the source list and the display list in the same
/// relative order, so the screen source at the display's enumeration index is
/// the match. Neither list may be reordered or sorted before index matching.
pub(crate) fn resolve_source_for_display(
    sources: &[SourceInfo],
    displays: &[DisplayInfo],
    display_id: &str,
) -> Option<String> {
    let display_index = displays.iter().position(|d| d.id == display_id)?;
    sources
        .iter()
        .filter(|s| s.kind == SourceKind::Screen)
        .nth(display_index)
        .map(|s| s.id.clone())
}

/// Count of window-class sources, used as a virtual-desktop transition
/// heuristic.
pub(crate) fn window_source_count(sources: &[SourceInfo]) -> usize {
    sources.iter().filter(|s| s.kind == SourceKind::Window).count()
}
