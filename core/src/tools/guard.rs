//! Write guard for AI-driven fragment mutations.
//!
//! Applies to the tool layer only: user-initiated writes and version
//! reverts bypass it. A locked fragment rejects every mutation; a fragment
//! with frozen sections rejects any content that no longer carries each
//! frozen substring verbatim.

use storyloom_protocol::Fragment;

use crate::error::{CoreError, Result};

/// Reject any tool mutation of a locked fragment.
pub fn ensure_unlocked(fragment: &Fragment) -> Result<()> {
    if fragment.is_locked() {
        return Err(CoreError::Protected(format!(
            "fragment {} is locked",
            fragment.id
        )));
    }
    Ok(())
}

/// Reject content that drops a frozen section.
pub fn ensure_frozen_preserved(fragment: &Fragment, new_content: &str) -> Result<()> {
    for section in fragment.frozen_sections() {
        if !new_content.contains(&section.text) {
            return Err(CoreError::Protected(format!(
                "write would remove frozen section {} of fragment {}",
                section.id, fragment.id
            )));
        }
    }
    Ok(())
}

/// Combined check for a content-bearing tool write.
pub fn check_write(fragment: &Fragment, new_content: Option<&str>) -> Result<()> {
    ensure_unlocked(fragment)?;
    if let Some(content) = new_content {
        ensure_frozen_preserved(fragment, content)?;
    }
    Ok(())
}
