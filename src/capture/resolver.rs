//! Resolving a selector to its top-level matches

use crate::session::{ElementHandle, PageSession};
use crate::{Error, Result};
use log::debug;

/// Elements matching `selector` in document order, minus any element that
/// sits inside another match.
///
/// Fails with `SelectorEmpty` when the selector is blank or nothing matches.
pub fn resolve<S: PageSession + ?Sized>(session: &S, selector: &str) -> Result<Vec<ElementHandle>> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(Error::SelectorEmpty(selector.to_string()));
    }

    let matched = session.query_selector_all(selector)?;
    let total = matched.len();

    let mut top_level = Vec::with_capacity(total);
    for element in matched {
        if !session.has_matching_ancestor(&element, selector)? {
            top_level.push(element);
        }
    }

    debug!(
        "Selector {:?} matched {} element(s), {} top-level",
        selector,
        total,
        top_level.len()
    );

    if top_level.is_empty() {
        return Err(Error::SelectorEmpty(selector.to_string()));
    }
    Ok(top_level)
}
