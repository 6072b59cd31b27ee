//! Temporary relocation of matched elements into a vertical stack
//!
//! [`StitchGuard`] owns the record of every move it made. Dropping it (or
//! calling [`StitchGuard::restore`]) puts each element back into its original
//! slot in reverse order and removes the container, so the document returns
//! to its previous shape on every exit path.

use crate::session::{ElementHandle, NodeMove, PageSession, StitchLayout};
use crate::{Error, Result};
use log::{debug, warn};

/// Reversible record of one stitch mutation
#[derive(Debug, Clone, PartialEq)]
pub struct StitchState {
    pub container: ElementHandle,
    pub moves: Vec<NodeMove>,
    /// The rest of the document was (possibly partly) hidden
    pub outside_hidden: bool,
}

pub struct StitchGuard<'a, S: PageSession + ?Sized> {
    session: &'a S,
    state: Option<StitchState>,
}

impl<'a, S: PageSession + ?Sized> StitchGuard<'a, S> {
    /// Create the container and move every element into it, in order.
    ///
    /// If a move fails the guard is dropped on the way out, which undoes the
    /// moves already made.
    pub fn build(session: &'a S, elements: &[ElementHandle], layout: &StitchLayout) -> Result<Self> {
        let container = session
            .create_stitch_container(layout)
            .map_err(|e| Error::StitchContainerCreationFailed(e.to_string()))?;

        let mut guard = Self {
            session,
            state: Some(StitchState {
                container: container.clone(),
                moves: Vec::with_capacity(elements.len()),
                outside_hidden: false,
            }),
        };

        for element in elements {
            let node_move = session
                .wrap_into(&container, element)
                .map_err(|e| Error::StitchContainerCreationFailed(e.to_string()))?;
            if let Some(state) = guard.state.as_mut() {
                state.moves.push(node_move);
            }
        }

        if let Some(state) = guard.state.as_mut() {
            state.outside_hidden = true;
        }
        let hidden = session
            .hide_outside(&container)
            .map_err(|e| Error::StitchContainerCreationFailed(e.to_string()))?;

        debug!(
            "Stitched {} element(s) into {}, hid {} block(s)",
            elements.len(),
            container.id(),
            hidden
        );
        Ok(guard)
    }

    pub fn container(&self) -> Option<&ElementHandle> {
        self.state.as_ref().map(|s| &s.container)
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Unhide the document, undo every move newest first, then remove the container.
    ///
    /// Failures are logged and skipped so they never mask the error that led
    /// here. A second call does nothing.
    pub fn restore(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };

        if state.outside_hidden {
            if let Err(e) = self.session.show_outside() {
                warn!("Failed to unhide document after stitching: {}", e);
            }
        }
        for node_move in state.moves.iter().rev() {
            if let Err(e) = self.session.unwrap(node_move) {
                warn!("Failed to restore {} after stitching: {}", node_move.moved.id(), e);
            }
        }
        if let Err(e) = self.session.remove_node(&state.container) {
            warn!("Failed to remove stitch container {}: {}", state.container.id(), e);
        }
        debug!("Restored {} stitched element(s)", state.moves.len());
    }
}

impl<S: PageSession + ?Sized> Drop for StitchGuard<'_, S> {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedPage;

    fn layout() -> StitchLayout {
        StitchLayout {
            gap: 10.0,
            padding: 0.0,
            transparent: false,
        }
    }

    #[test]
    fn restore_is_idempotent() {
        let page = ScriptedPage::builder()
            .block("div#a", 100.0)
            .block("div#b", 50.0)
            .block("div#c", 100.0)
            .build();
        let before = page.dom_snapshot();
        let elements = page.query_selector_all("#a, #c").unwrap();

        let mut guard = StitchGuard::build(&page, &elements, &layout()).unwrap();
        assert_ne!(page.dom_snapshot(), before);
        guard.restore();
        assert_eq!(page.dom_snapshot(), before);
        guard.restore();
        assert_eq!(page.dom_snapshot(), before);
        assert!(!guard.is_active());
    }

    #[test]
    fn other_blocks_are_hidden_while_stitched() {
        let page = ScriptedPage::builder()
            .block("div#a", 100.0)
            .block("div#b", 50.0)
            .block("div#c", 100.0)
            .build();
        let elements = page.query_selector_all("#a, #c").unwrap();

        let mut guard = StitchGuard::build(&page, &elements, &layout()).unwrap();
        assert_eq!(page.hidden_ids(), vec!["b".to_string()]);
        guard.restore();
        assert!(page.hidden_ids().is_empty());
    }

    #[test]
    fn drop_restores_document() {
        let page = ScriptedPage::builder()
            .block("div#a", 100.0)
            .block("div#b", 50.0)
            .build();
        let before = page.dom_snapshot();
        {
            let elements = page.query_selector_all("div").unwrap();
            let _guard = StitchGuard::build(&page, &elements, &layout()).unwrap();
        }
        assert_eq!(page.dom_snapshot(), before);
    }

    #[test]
    fn failed_move_undoes_earlier_moves() {
        let page = ScriptedPage::builder()
            .block("div#a", 100.0)
            .block("div#b", 50.0)
            .block("div#c", 100.0)
            .build();
        page.fail_wrap_after(1);
        let before = page.dom_snapshot();
        let elements = page.query_selector_all("div").unwrap();

        let result = StitchGuard::build(&page, &elements, &layout());
        assert!(matches!(result, Err(Error::StitchContainerCreationFailed(_))));
        assert_eq!(page.dom_snapshot(), before);
    }
}
